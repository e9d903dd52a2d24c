//! X11 display helpers
//!
//! This module decides which display number an X server ends up on. There are
//! three ways to get one, see [`Allocation`]:
//!
//! - an explicit `:N` given by the user,
//! - a scan of [`X11_SOCKET_DIR`] picking the number after the highest one in use,
//! - a [`handshake`] channel over which the X server reports the display it bound.
//!
//! When the display is known upfront, [`wait_for_socket`] gates on the X
//! server's socket showing up before clients get started.

pub mod handshake;
mod x11_sockets;

pub use self::x11_sockets::{
    scan_for_free_display, wait_for_socket, Allocation, DisplayError, Readiness, ReadinessError,
    ReadinessPolicy, XDisplay, X11_SOCKET_DIR,
};
