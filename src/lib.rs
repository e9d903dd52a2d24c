#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Wayback: X11 sessions on top of a Wayland compositor
//!
//! This crate runs a complete X11 desktop session on a nested Wayland compositor and a rootful
//! Xwayland. It holds the pieces shared by the `wayback-session` and `xwayback` binaries.
//!
//! ## Structure of the crate
//!
//! - [`session`] drives a session: it picks a display, starts the X shim, waits for the display to
//!   come up and runs the user's session on it.
//! - [`xshim`] is the X shim itself: it starts the compositor, asks it about its outputs, and
//!   starts Xwayland sized after the primary one.
//! - [`process`] supervises a group of child processes: as soon as one member exits, all the
//!   others are killed.
//! - [`x11`] allocates X displays and carries the display handshake between processes.
//! - [`wayland`] and [`output`] implement output discovery on the compositor.
//!
//! ## Process lifetime
//!
//! Every process is part of a group supervised by a [`ProcessGroupSupervisor`](process::ProcessGroupSupervisor),
//! which is built around a [`calloop`] event loop. Exits are observed through pidfds rather than
//! through a `SIGCHLD` handler, so the supervisor only ever acts from ordinary code and never
//! needs global state.
//!
//! ### Logging
//!
//! Wayback makes extensive use of [`tracing`] for its internal logging. The binaries install a
//! `tracing-subscriber` writing to stderr, filtered through `RUST_LOG`.

pub mod output;
pub mod process;
pub mod session;
pub mod wayland;
pub mod x11;
pub mod xshim;
