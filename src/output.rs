//! Output descriptions
//!
//! This module holds what a compositor told us about its outputs, as
//! collected by [`OutputDiscovery`](crate::wayland::OutputDiscovery).
//!
//! Information about an output arrives piecemeal, from `wl_output` events
//! first and `zxdg_output_v1` events later on. Each [`OutputDescriptor`] tracks
//! how far along it is with an [`OutputPhase`] and is only to be trusted once
//! [`Finalized`](OutputPhase::Finalized), which happens after the second
//! synchronization round-trip of discovery.
//!
//! ```
//! use wayback::output::{Mode, OutputSet, Size};
//!
//! let mut outputs = OutputSet::default();
//! let output = outputs.announce(42);
//! output.apply_mode(Mode { size: (2560, 1440).into(), refresh: 60_000 });
//! output.apply_scale(2);
//! outputs.finalize();
//!
//! assert_eq!(outputs.primary_geometry().unwrap(), Size { w: 1280, h: 720 });
//! assert_eq!(outputs.primary_geometry().unwrap().to_string(), "1280x720");
//! ```

use std::fmt;

use indexmap::IndexMap;
use tracing::debug;

/// A size in logical or physical units, depending on context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width
    pub w: i32,
    /// Height
    pub h: i32,
}

impl Size {
    fn is_positive(&self) -> bool {
        self.w > 0 && self.h > 0
    }
}

impl From<(i32, i32)> for Size {
    fn from((w, h): (i32, i32)) -> Size {
        Size { w, h }
    }
}

/// Formats as `WxH`, the form X servers take for `-geometry`
impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// A position in the compositor space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    /// Horizontal coordinate
    pub x: i32,
    /// Vertical coordinate
    pub y: i32,
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Point {
        Point { x, y }
    }
}

/// An output mode
///
/// A possible combination of dimensions and refresh rate for an output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mode {
    /// The size of the mode, in pixels
    pub size: Size,
    /// The refresh rate in millihertz
    pub refresh: i32,
}

/// Subpixel geometry information
///
/// This enumeration describes how the physical pixels on an output are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Subpixel {
    /// Unknown subpixel geometry
    #[default]
    Unknown,
    /// No subpixel geometry
    None,
    /// Subpixels are arranged horizontally starting with
    /// red, then green, last blue
    HorizontalRgb,
    /// Subpixels are arranged horizontally starting with
    /// blue, then green, last red
    HorizontalBgr,
    /// Subpixels are arranged vertically starting with
    /// red, then green, last blue
    VerticalRgb,
    /// Subpixels are arranged vertically starting with
    /// blue, then green, last red
    VerticalBgr,
}

/// Possible transformations to two-dimensional planes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Identity transformation (plane is unaltered when applied)
    #[default]
    Normal,
    /// Plane is rotated by 90 degrees
    _90,
    /// Plane is rotated by 180 degrees
    _180,
    /// Plane is rotated by 270 degrees
    _270,
    /// Plane is flipped vertically
    Flipped,
    /// Plane is flipped vertically and rotated by 90 degrees
    Flipped90,
    /// Plane is flipped vertically and rotated by 180 degrees
    Flipped180,
    /// Plane is flipped vertically and rotated by 270 degrees
    Flipped270,
}

impl Transform {
    /// Transformed size after applying this transformation.
    pub fn transform_size(&self, size: Size) -> Size {
        if *self == Transform::_90
            || *self == Transform::_270
            || *self == Transform::Flipped90
            || *self == Transform::Flipped270
        {
            Size { w: size.h, h: size.w }
        } else {
            size
        }
    }
}

/// The physical properties of an output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalProperties {
    /// The size of the monitor, in millimeters
    pub size: Size,
    /// The subpixel geometry
    pub subpixel: Subpixel,
    /// Textual representation of the make
    pub make: String,
    /// Textual representation of the model
    pub model: String,
}

/// How much is known about an output
///
/// Phases only move forward. An output missing some information (for example
/// when the compositor has no `zxdg_output_manager_v1`) skips phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputPhase {
    /// The global was announced and bound
    Announced,
    /// `wl_output.geometry` arrived
    GeometryKnown,
    /// The current `wl_output.mode` arrived
    ModeKnown,
    /// `zxdg_output_v1` logical geometry arrived
    ExtendedInfoKnown,
    /// Discovery is over, the description is complete
    Finalized,
}

/// Everything known about one output of the compositor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    id: u32,
    name: Option<String>,
    description: Option<String>,
    physical: PhysicalProperties,
    location: Point,
    logical_location: Option<Point>,
    logical_size: Option<Size>,
    current_mode: Option<Mode>,
    scale: i32,
    transform: Transform,
    phase: OutputPhase,
}

impl OutputDescriptor {
    /// A freshly announced output
    pub fn new(id: u32) -> OutputDescriptor {
        OutputDescriptor {
            id,
            name: None,
            description: None,
            physical: PhysicalProperties::default(),
            location: Point::default(),
            logical_location: None,
            logical_size: None,
            current_mode: None,
            scale: 1,
            transform: Transform::Normal,
            phase: OutputPhase::Announced,
        }
    }

    /// Protocol id, the name of the `wl_output` global
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Compositor assigned name, like `DP-1`
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Human readable description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Physical properties
    pub fn physical_properties(&self) -> &PhysicalProperties {
        &self.physical
    }

    /// Position as reported by `wl_output.geometry`
    pub fn location(&self) -> Point {
        self.logical_location.unwrap_or(self.location)
    }

    /// Size in the compositor's logical space
    ///
    /// Once finalized this is set whenever the output had a logical size or a
    /// current mode.
    pub fn logical_size(&self) -> Option<Size> {
        self.logical_size
    }

    /// Current mode
    pub fn current_mode(&self) -> Option<Mode> {
        self.current_mode
    }

    /// Integer scale factor
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Output transform
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// How much is known about the output
    pub fn phase(&self) -> OutputPhase {
        self.phase
    }

    fn advance(&mut self, phase: OutputPhase) {
        if self.phase < phase && self.phase != OutputPhase::Finalized {
            self.phase = phase;
        }
    }

    /// Record `wl_output.geometry`
    pub fn apply_geometry(&mut self, location: Point, physical: PhysicalProperties, transform: Transform) {
        self.location = location;
        self.physical = physical;
        self.transform = transform;
        self.advance(OutputPhase::GeometryKnown);
    }

    /// Record the current `wl_output.mode`
    pub fn apply_mode(&mut self, mode: Mode) {
        self.current_mode = Some(mode);
        self.advance(OutputPhase::ModeKnown);
    }

    /// Record `wl_output.scale`
    pub fn apply_scale(&mut self, factor: i32) {
        self.scale = factor;
    }

    /// Record `zxdg_output_v1.logical_position`
    pub fn apply_logical_position(&mut self, location: Point) {
        self.logical_location = Some(location);
        self.advance(OutputPhase::ExtendedInfoKnown);
    }

    /// Record `zxdg_output_v1.logical_size`
    ///
    /// Sizes that aren't positive are placeholders and get ignored.
    pub fn apply_logical_size(&mut self, size: Size) {
        if size.is_positive() {
            self.logical_size = Some(size);
            self.advance(OutputPhase::ExtendedInfoKnown);
        }
    }

    /// Record the output name
    pub fn apply_name(&mut self, name: String) {
        self.name = Some(name);
    }

    /// Record the output description
    pub fn apply_description(&mut self, description: String) {
        self.description = Some(description);
    }

    /// Mark the description as complete
    ///
    /// Without a logical size from `zxdg_output_v1`, it is derived from the
    /// current mode, the scale and the transform.
    pub fn finalize(&mut self) {
        if self.logical_size.is_none() {
            self.logical_size = self.current_mode.map(|mode| {
                let scale = self.scale.max(1);
                let size = Size {
                    w: mode.size.w / scale,
                    h: mode.size.h / scale,
                };
                self.transform.transform_size(size)
            });
        }
        self.phase = OutputPhase::Finalized;
        debug!(
            output = self.id,
            name = ?self.name,
            logical_size = ?self.logical_size,
            "Output finalized"
        );
    }
}

/// Errors about the set of discovered outputs
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// The compositor advertised no output at all
    #[error("no output was discovered")]
    NoOutputs,
    /// The output has neither a logical size nor a current mode
    #[error("output {0} reported no usable size")]
    NoGeometry(u32),
}

/// The outputs of a compositor, keyed by protocol id
///
/// Keeps announcement order: the first output announced is the primary one.
#[derive(Debug, Clone, Default)]
pub struct OutputSet {
    outputs: IndexMap<u32, OutputDescriptor>,
}

impl OutputSet {
    /// Register a new output, or get the existing one with this id
    pub fn announce(&mut self, id: u32) -> &mut OutputDescriptor {
        self.outputs.entry(id).or_insert_with(|| OutputDescriptor::new(id))
    }

    /// Forget an output whose global went away
    pub fn remove(&mut self, id: u32) -> Option<OutputDescriptor> {
        self.outputs.shift_remove(&id)
    }

    /// Access an output by id
    pub fn get_mut(&mut self, id: u32) -> Option<&mut OutputDescriptor> {
        self.outputs.get_mut(&id)
    }

    /// Iterate over the outputs in announcement order
    pub fn iter(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.outputs.values()
    }

    /// Number of outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether no output is known
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Finalize every output
    pub fn finalize(&mut self) {
        for output in self.outputs.values_mut() {
            output.finalize();
        }
    }

    /// The first output that was announced
    pub fn primary(&self) -> Option<&OutputDescriptor> {
        self.outputs.first().map(|(_, output)| output)
    }

    /// Logical size of the primary output
    pub fn primary_geometry(&self) -> Result<Size, OutputError> {
        let primary = self.primary().ok_or(OutputError::NoOutputs)?;
        primary
            .logical_size()
            .filter(Size::is_positive)
            .ok_or(OutputError::NoGeometry(primary.id()))
    }
}
