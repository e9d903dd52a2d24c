use std::{fmt, os::unix::net::UnixStream};

use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};
use wayland_client::{
    protocol::{
        wl_output::{self, WlOutput},
        wl_registry::{self, WlRegistry},
    },
    Connection, Dispatch, EventQueue, QueueHandle, WEnum,
};
use wayland_protocols::xdg::xdg_output::zv1::client::{
    zxdg_output_manager_v1::{self, ZxdgOutputManagerV1},
    zxdg_output_v1::{self, ZxdgOutputV1},
};

use super::DiscoveryError;
use crate::output::{Mode, OutputSet, PhysicalProperties, Size, Subpixel, Transform};

const WL_OUTPUT_VERSION: u32 = 4;
const XDG_OUTPUT_MANAGER_VERSION: u32 = 3;

/// Client collecting the outputs of a running compositor
///
/// ```no_run
/// use std::os::unix::net::UnixStream;
/// use wayback::wayland::OutputDiscovery;
///
/// # fn socket() -> UnixStream { unimplemented!() }
/// let outputs = OutputDiscovery::from_socket(socket())?.discover()?;
/// println!("{}", outputs.primary_geometry()?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct OutputDiscovery {
    connection: Connection,
    event_queue: EventQueue<DiscoveryState>,
    state: DiscoveryState,
}

impl fmt::Debug for OutputDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDiscovery")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OutputDiscovery {
    /// Talk to the compositor on the other side of `socket`
    pub fn from_socket(socket: UnixStream) -> Result<OutputDiscovery, DiscoveryError> {
        let connection = Connection::from_socket(socket)?;
        Ok(OutputDiscovery::new(connection))
    }

    fn new(connection: Connection) -> OutputDiscovery {
        let event_queue = connection.new_event_queue();
        let qh = event_queue.handle();
        let _registry = connection.display().get_registry(&qh, ());
        info!("Connected to Wayland compositor");

        OutputDiscovery {
            connection,
            event_queue,
            state: DiscoveryState::default(),
        }
    }

    /// Enumerate the outputs
    ///
    /// Takes two round-trips. The first one delivers the globals, which get
    /// bound as they come in. The second one delivers the `wl_output` and
    /// `zxdg_output_v1` events of the objects bound during the first. Reading
    /// any output before the second one completes gets stale or zero sizes.
    pub fn discover(mut self) -> Result<OutputSet, DiscoveryError> {
        self.event_queue.roundtrip(&mut self.state)?;
        trace!(outputs = self.state.outputs.len(), "Globals received");
        self.event_queue.roundtrip(&mut self.state)?;

        let mut outputs = self.state.outputs;
        if outputs.is_empty() {
            return Err(DiscoveryError::NoOutputs);
        }
        outputs.finalize();
        if self.state.xdg_output_manager.is_none() {
            debug!("Compositor has no xdg-output support, logical sizes derived from modes");
        }
        info!(outputs = outputs.len(), "Output discovery complete");
        Ok(outputs)
    }
}

#[derive(Debug, Default)]
struct DiscoveryState {
    outputs: OutputSet,
    // protocol objects of each output, by global name
    bound: IndexMap<u32, BoundOutput>,
    xdg_output_manager: Option<ZxdgOutputManagerV1>,
}

#[derive(Debug)]
struct BoundOutput {
    wl_output: WlOutput,
    xdg_output: Option<ZxdgOutputV1>,
}

impl DiscoveryState {
    fn request_xdg_output(&mut self, name: u32, qh: &QueueHandle<DiscoveryState>) {
        let (Some(manager), Some(bound)) = (self.xdg_output_manager.as_ref(), self.bound.get_mut(&name)) else {
            return;
        };
        if bound.xdg_output.is_none() {
            bound.xdg_output = Some(manager.get_xdg_output(&bound.wl_output, qh, name));
        }
    }
}

impl Dispatch<WlRegistry, ()> for DiscoveryState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match interface.as_str() {
                "wl_output" => {
                    debug!(output = name, version, "Binding output");
                    let wl_output = registry.bind::<WlOutput, _, _>(name, version.min(WL_OUTPUT_VERSION), qh, name);
                    state.outputs.announce(name);
                    state.bound.insert(
                        name,
                        BoundOutput {
                            wl_output,
                            xdg_output: None,
                        },
                    );
                    state.request_xdg_output(name, qh);
                }
                "zxdg_output_manager_v1" if state.xdg_output_manager.is_none() => {
                    debug!(version, "Binding xdg output manager");
                    state.xdg_output_manager = Some(registry.bind::<ZxdgOutputManagerV1, _, _>(
                        name,
                        version.min(XDG_OUTPUT_MANAGER_VERSION),
                        qh,
                        (),
                    ));
                    let known: Vec<u32> = state.bound.keys().copied().collect();
                    for output in known {
                        state.request_xdg_output(output, qh);
                    }
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                if state.bound.shift_remove(&name).is_some() {
                    warn!(output = name, "Output removed during discovery");
                    state.outputs.remove(name);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, u32> for DiscoveryState {
    fn event(
        state: &mut Self,
        _: &WlOutput,
        event: wl_output::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.outputs.get_mut(*name) else {
            return;
        };
        match event {
            wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
                transform,
            } => {
                output.apply_geometry(
                    (x, y).into(),
                    PhysicalProperties {
                        size: (physical_width, physical_height).into(),
                        subpixel: subpixel.into_result().map(Subpixel::from).unwrap_or_default(),
                        make,
                        model,
                    },
                    transform.into_result().map(Transform::from).unwrap_or_default(),
                );
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                if is_current(flags) {
                    output.apply_mode(Mode {
                        size: (width, height).into(),
                        refresh,
                    });
                }
            }
            wl_output::Event::Scale { factor } => output.apply_scale(factor),
            wl_output::Event::Name { name } => output.apply_name(name),
            wl_output::Event::Description { description } => output.apply_description(description),
            wl_output::Event::Done => trace!(output = *name, "wl_output done"),
            _ => {}
        }
    }
}

impl Dispatch<ZxdgOutputManagerV1, ()> for DiscoveryState {
    fn event(
        _: &mut Self,
        _: &ZxdgOutputManagerV1,
        _: zxdg_output_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZxdgOutputV1, u32> for DiscoveryState {
    fn event(
        state: &mut Self,
        _: &ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.outputs.get_mut(*name) else {
            return;
        };
        match event {
            zxdg_output_v1::Event::LogicalPosition { x, y } => output.apply_logical_position((x, y).into()),
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                output.apply_logical_size(Size { w: width, h: height })
            }
            // wl_output v4 carries these too, don't let the deprecated ones override it
            zxdg_output_v1::Event::Name { name } if output.name().is_none() => output.apply_name(name),
            zxdg_output_v1::Event::Description { description } if output.description().is_none() => {
                output.apply_description(description)
            }
            zxdg_output_v1::Event::Done => trace!(output = *name, "xdg_output done"),
            _ => {}
        }
    }
}

fn is_current(flags: WEnum<wl_output::Mode>) -> bool {
    flags
        .into_result()
        .map(|flags| flags.contains(wl_output::Mode::Current))
        .unwrap_or(false)
}

impl From<wl_output::Subpixel> for Subpixel {
    fn from(subpixel: wl_output::Subpixel) -> Subpixel {
        match subpixel {
            wl_output::Subpixel::None => Subpixel::None,
            wl_output::Subpixel::HorizontalRgb => Subpixel::HorizontalRgb,
            wl_output::Subpixel::HorizontalBgr => Subpixel::HorizontalBgr,
            wl_output::Subpixel::VerticalRgb => Subpixel::VerticalRgb,
            wl_output::Subpixel::VerticalBgr => Subpixel::VerticalBgr,
            _ => Subpixel::Unknown,
        }
    }
}

impl From<wl_output::Transform> for Transform {
    fn from(transform: wl_output::Transform) -> Transform {
        match transform {
            wl_output::Transform::_90 => Transform::_90,
            wl_output::Transform::_180 => Transform::_180,
            wl_output::Transform::_270 => Transform::_270,
            wl_output::Transform::Flipped => Transform::Flipped,
            wl_output::Transform::Flipped90 => Transform::Flipped90,
            wl_output::Transform::Flipped180 => Transform::Flipped180,
            wl_output::Transform::Flipped270 => Transform::Flipped270,
            _ => Transform::Normal,
        }
    }
}
