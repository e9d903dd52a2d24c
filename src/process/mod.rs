//! Process supervision
//!
//! A wayback session is a handful of cooperating processes: the compositor,
//! the X server and the user session. None of them is useful without the
//! others, so they are started and stopped as one unit by a
//! [`ProcessGroupSupervisor`].
//!
//! Descriptors a child needs (handshake pipes, wayland sockets) are handed to
//! it with [`pass_fd`], which moves ownership into the child's [`Command`](std::process::Command).

mod fd;
mod supervisor;

pub use self::fd::pass_fd;
pub(crate) use self::fd::set_cloexec;
pub use self::supervisor::{
    ExitKind, ManagedProcess, ProcessGroupSupervisor, ProcessState, Role, SupervisorError, Teardown,
};
