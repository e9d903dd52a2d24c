//! Wayland client side of wayback
//!
//! Before the X server can be started, it has to know how large to make its
//! screen. [`OutputDiscovery`] connects to the freshly started compositor as a
//! regular Wayland client, enumerates its outputs through `wl_output` and,
//! when available, `zxdg_output_manager_v1`, and hands back an
//! [`OutputSet`](crate::output::OutputSet).

mod discovery;
#[cfg(test)]
mod fake_compositor;

pub use self::discovery::OutputDiscovery;

use wayland_client::{backend, ConnectError, DispatchError};

use crate::output::OutputError;

/// Errors of output discovery
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Failed to connect to the compositor.
    #[error("failed to connect to the compositor")]
    Connect(#[from] ConnectError),

    /// Error while dispatching events.
    #[error("failed to dispatch compositor events")]
    Dispatch(#[from] DispatchError),

    /// Error when using the wayland connection.
    #[error("wayland connection error")]
    Connection(#[from] backend::WaylandError),

    /// The compositor advertised no output.
    #[error("the compositor advertised no outputs")]
    NoOutputs,

    /// The discovered outputs can't size an X server.
    #[error(transparent)]
    Output(#[from] OutputError),
}
