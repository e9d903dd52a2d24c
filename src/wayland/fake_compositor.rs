//! In-process compositor advertising scripted outputs, for discovery tests

use std::{
    os::unix::net::UnixStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use wayland_protocols::xdg::xdg_output::zv1::server::{
    zxdg_output_manager_v1::{self, ZxdgOutputManagerV1},
    zxdg_output_v1::{self, ZxdgOutputV1},
};
use wayland_server::{
    backend::{ClientData, ClientId, DisconnectReason, GlobalId},
    protocol::wl_output::{self, WlOutput},
    Client, DataInit, Dispatch, Display, DisplayHandle, GlobalDispatch, New, Resource,
};

#[derive(Debug, Clone)]
pub struct FakeOutput {
    pub name: &'static str,
    pub mode: (i32, i32),
    pub scale: i32,
    pub transform: wl_output::Transform,
    /// Sent through `zxdg_output_v1` when the manager is advertised
    pub logical_size: (i32, i32),
}

impl FakeOutput {
    pub fn new(name: &'static str, mode: (i32, i32)) -> FakeOutput {
        FakeOutput {
            name,
            mode,
            scale: 1,
            transform: wl_output::Transform::Normal,
            logical_size: mode,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Scenario {
    /// Advertised in order, before the xdg output manager
    pub outputs: Vec<FakeOutput>,
    pub xdg_output: bool,
    /// Output whose global goes away as soon as a client binds it
    pub remove_on_bind: Option<usize>,
}

/// What the client asked for
#[derive(Debug, Default)]
pub struct Report {
    pub bound_outputs: usize,
    pub xdg_outputs: usize,
}

struct Compositor {
    scenario: Scenario,
    globals: Vec<GlobalId>,
    report: Report,
}

struct ClientState(Arc<AtomicBool>);

impl ClientData for ClientState {
    fn disconnected(&self, _client_id: ClientId, _reason: DisconnectReason) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Serve `scenario` to the client on the other end of `stream` until it hangs up
pub fn serve(scenario: Scenario, stream: UnixStream) -> JoinHandle<Report> {
    thread::spawn(move || {
        let mut display = Display::<Compositor>::new().expect("failed to create display");
        let mut dh = display.handle();

        let globals = (0..scenario.outputs.len())
            .map(|index| dh.create_global::<Compositor, WlOutput, _>(4, index))
            .collect();
        if scenario.xdg_output {
            dh.create_global::<Compositor, ZxdgOutputManagerV1, _>(3, ());
        }

        let gone = Arc::new(AtomicBool::new(false));
        dh.insert_client(stream, Arc::new(ClientState(gone.clone())))
            .expect("failed to insert client");

        let mut state = Compositor {
            scenario,
            globals,
            report: Report::default(),
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !gone.load(Ordering::SeqCst) && Instant::now() < deadline {
            if display.dispatch_clients(&mut state).is_err() || display.flush_clients().is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        state.report
    })
}

impl GlobalDispatch<WlOutput, usize> for Compositor {
    fn bind(
        state: &mut Self,
        handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlOutput>,
        index: &usize,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let output = data_init.init(resource, *index);
        let spec = state.scenario.outputs[*index].clone();

        output.geometry(
            0,
            0,
            600,
            340,
            wl_output::Subpixel::HorizontalRgb,
            "Wayback".into(),
            spec.name.into(),
            spec.transform,
        );
        // a mode that isn't current comes first, it must not be picked
        output.mode(wl_output::Mode::Preferred, 640, 480, 60_000);
        output.mode(wl_output::Mode::Current, spec.mode.0, spec.mode.1, 60_000);
        output.scale(spec.scale);
        output.name(spec.name.into());
        output.done();

        state.report.bound_outputs += 1;
        if state.scenario.remove_on_bind == Some(*index) {
            handle.disable_global::<Compositor>(state.globals[*index].clone());
        }
    }
}

impl Dispatch<WlOutput, usize> for Compositor {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &WlOutput,
        _request: wl_output::Request,
        _data: &usize,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl GlobalDispatch<ZxdgOutputManagerV1, ()> for Compositor {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZxdgOutputManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZxdgOutputManagerV1, ()> for Compositor {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &ZxdgOutputManagerV1,
        request: zxdg_output_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let zxdg_output_manager_v1::Request::GetXdgOutput { id, output } = request {
            let index = *output.data::<usize>().expect("not one of our outputs");
            let xdg_output = data_init.init(id, index);
            let (w, h) = state.scenario.outputs[index].logical_size;
            xdg_output.logical_position(0, 0);
            xdg_output.logical_size(w, h);
            state.report.xdg_outputs += 1;
        }
    }
}

impl Dispatch<ZxdgOutputV1, usize> for Compositor {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZxdgOutputV1,
        _request: zxdg_output_v1::Request,
        _data: &usize,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}
