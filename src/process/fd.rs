use std::{
    os::{
        fd::{AsFd, AsRawFd, OwnedFd, RawFd},
        unix::process::CommandExt,
    },
    process::Command,
};

use rustix::{
    io::{fcntl_setfd, FdFlags},
    process::{set_parent_process_death_signal, Signal},
};

/// Hand `fd` over to the process spawned from `command`
///
/// The descriptor is moved into `command` and has its `FD_CLOEXEC` flag
/// cleared in the child right before exec, so it is only inherited by that
/// one child. Our copy gets closed when `command` is dropped.
///
/// Returns the descriptor number the child will see, to be put on its
/// command line.
pub fn pass_fd(command: &mut Command, fd: OwnedFd) -> RawFd {
    let raw = fd.as_raw_fd();
    unsafe {
        command.pre_exec(move || {
            unset_cloexec(&fd)?;
            Ok(())
        });
    }
    raw
}

/// Remove the `FD_CLOEXEC` flag from this fd
///
/// This means that the fd will *not* be automatically
/// closed when we exec() into the child
fn unset_cloexec(fd: impl AsFd) -> rustix::io::Result<()> {
    fcntl_setfd(fd, FdFlags::empty())
}

/// Set the `FD_CLOEXEC` flag on this fd
///
/// Used on descriptors we inherited, so they aren't leaked to every child we
/// spawn but only handed on with [`pass_fd`].
pub(crate) fn set_cloexec(fd: impl AsFd) -> rustix::io::Result<()> {
    fcntl_setfd(fd, FdFlags::CLOEXEC)
}

/// Have the process spawned from `command` killed when its parent dies
pub(crate) fn die_with_parent(command: &mut Command) {
    unsafe {
        command.pre_exec(|| {
            set_parent_process_death_signal(Some(Signal::Kill))?;
            Ok(())
        });
    }
}
