use std::{
    fmt, io,
    os::unix::process::ExitStatusExt,
    process::{Child, Command, ExitStatus},
    time::Duration,
};

use calloop::{generic::Generic, EventLoop, Interest, Mode, PostAction};
use indexmap::IndexMap;
use rustix::process::{pidfd_open, Pid, PidfdFlags};
use tracing::{debug, info, warn};

use super::fd::die_with_parent;

/// The part a supervised process plays in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// The Wayland compositor
    Compositor,
    /// The X server
    XShim,
    /// The user session running on the X server
    Session,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Compositor => "compositor",
            Role::XShim => "x-shim",
            Role::Session => "session",
        })
    }
}

/// Lifecycle of a [`ManagedProcess`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Forked, but its exit is not watched yet
    Spawned,
    /// Running and watched
    Running,
    /// Exited and reaped
    Exited(ExitStatus),
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with status 0
    Success,
    /// Exited with the given non-zero status
    Failure(i32),
    /// Was killed by the given signal
    Signaled(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> ExitKind {
        match (status.code(), status.signal()) {
            (Some(0), _) => ExitKind::Success,
            (Some(code), _) => ExitKind::Failure(code),
            (None, Some(signal)) => ExitKind::Signaled(signal),
            // stopped or continued, waitpid() is not asked to report those
            (None, None) => ExitKind::Failure(-1),
        }
    }
}

/// A child process owned by a [`ProcessGroupSupervisor`]
#[derive(Debug)]
pub struct ManagedProcess {
    role: Role,
    child: Child,
    state: ProcessState,
}

impl ManagedProcess {
    /// The role of this process
    pub fn role(&self) -> Role {
        self.role
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    fn is_alive(&self) -> bool {
        !matches!(self.state, ProcessState::Exited(_))
    }

    // Returns true once the process has been reaped
    fn reap(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.state = ProcessState::Exited(status);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(role = %self.role, pid = self.pid(), "Failed to reap process: {}", err);
                false
            }
        }
    }

    fn kill(&mut self) {
        debug!(role = %self.role, pid = self.pid(), "Killing process");
        if let Err(err) = self.child.kill() {
            warn!(role = %self.role, pid = self.pid(), "Failed to kill process: {}", err);
        }
        match self.child.wait() {
            Ok(status) => self.state = ProcessState::Exited(status),
            Err(err) => warn!(role = %self.role, pid = self.pid(), "Failed to reap process: {}", err),
        }
    }
}

/// The end of a process group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    /// The process whose exit brought the group down
    pub cause: Role,
    /// Its exit status
    pub status: ExitStatus,
    /// The processes that were still alive and got killed
    pub killed: Vec<Role>,
}

/// Errors of the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The event loop failed
    #[error("supervisor event loop failed")]
    EventLoop(#[from] calloop::Error),
    /// A process with this role is already part of the group
    #[error("a {0} process is already supervised")]
    AlreadySpawned(Role),
    /// Spawning the process failed, including exec failures
    #[error("failed to spawn the {role} process")]
    Spawn {
        /// Role of the process
        role: Role,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// The process was spawned but its exit can't be watched
    #[error("failed to watch the {role} process")]
    Watch {
        /// Role of the process
        role: Role,
        /// The underlying error
        #[source]
        source: io::Error,
    },
    /// Waiting on a group without processes would never return
    #[error("no process to supervise")]
    Empty,
}

#[derive(Debug, Default)]
struct GroupState {
    processes: IndexMap<Role, ManagedProcess>,
    // exits in the order they were observed
    exits: Vec<(Role, ExitStatus)>,
}

impl GroupState {
    fn process_exited(&mut self, role: Role) -> bool {
        let Some(process) = self.processes.get_mut(&role) else {
            return true;
        };
        if !process.reap() {
            return false;
        }
        if let ProcessState::Exited(status) = process.state {
            let pid = process.pid();
            match ExitKind::from(status) {
                ExitKind::Success => info!(role = %role, pid, "Process exited"),
                ExitKind::Failure(code) => warn!(role = %role, pid, code, "Process exited with failure"),
                ExitKind::Signaled(signal) => warn!(role = %role, pid, signal, "Process was killed"),
            }
            self.exits.push((role, status));
        }
        true
    }

    // Everything still alive except the cause of the teardown
    fn victims(&self, cause: Role) -> Vec<Role> {
        self.processes
            .values()
            .filter(|process| process.role != cause && process.is_alive())
            .map(|process| process.role)
            .collect()
    }
}

/// Supervisor of a small group of processes that live and die together
///
/// The first exit of any member, for whatever reason, brings the whole group
/// down: every other member still alive gets `SIGKILL`ed. There is no restart
/// and no degraded mode.
///
/// Each child is watched through a pidfd registered on a [`calloop`] event
/// loop, so exits are only ever processed from [`poll`](Self::poll) and
/// [`wait`](Self::wait), never from a signal handler.
///
/// Children are also set up to be killed if the supervising process dies.
/// Dropping the supervisor kills whatever is still running.
pub struct ProcessGroupSupervisor {
    event_loop: EventLoop<'static, GroupState>,
    state: GroupState,
    teardown: Option<Teardown>,
}

impl fmt::Debug for ProcessGroupSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroupSupervisor")
            .field("state", &self.state)
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}

impl ProcessGroupSupervisor {
    /// Create an empty group
    pub fn new() -> Result<ProcessGroupSupervisor, SupervisorError> {
        Ok(ProcessGroupSupervisor {
            event_loop: EventLoop::try_new()?,
            state: GroupState::default(),
            teardown: None,
        })
    }

    /// Spawn `command` as the group member playing `role`
    ///
    /// `command` is consumed, closing our copies of any descriptor that was
    /// passed to the child with [`pass_fd`](super::pass_fd).
    pub fn spawn(&mut self, role: Role, mut command: Command) -> Result<u32, SupervisorError> {
        if self.state.processes.contains_key(&role) {
            return Err(SupervisorError::AlreadySpawned(role));
        }

        die_with_parent(&mut command);
        let child = command
            .spawn()
            .map_err(|source| SupervisorError::Spawn { role, source })?;
        drop(command);

        let pid = child.id();
        let pidfd = pidfd_open(Pid::from_child(&child), PidfdFlags::empty());
        self.state.processes.insert(
            role,
            ManagedProcess {
                role,
                child,
                state: ProcessState::Spawned,
            },
        );
        let pidfd = pidfd.map_err(|err| SupervisorError::Watch {
            role,
            source: err.into(),
        })?;

        self.event_loop
            .handle()
            .insert_source(
                Generic::new(pidfd, Interest::READ, Mode::Level),
                move |_, _, state: &mut GroupState| {
                    Ok(if state.process_exited(role) {
                        PostAction::Remove
                    } else {
                        PostAction::Continue
                    })
                },
            )
            .map_err(|err| err.error)?;

        if let Some(process) = self.state.processes.get_mut(&role) {
            process.state = ProcessState::Running;
        }
        info!(role = %role, pid, "Spawned process");
        Ok(pid)
    }

    /// The members of the group, in spawn order
    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.state.processes.values()
    }

    /// Process pending exits, waiting up to `timeout` for one
    ///
    /// `None` waits indefinitely. Returns the [`Teardown`] once a member
    /// exited and the rest of the group has been killed.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<Teardown>, SupervisorError> {
        if self.teardown.is_none() {
            self.event_loop.dispatch(timeout, &mut self.state)?;
            self.teardown = self.collapse();
        }
        Ok(self.teardown.clone())
    }

    /// Block until the group is torn down
    pub fn wait(mut self) -> Result<Teardown, SupervisorError> {
        if self.state.processes.is_empty() {
            return Err(SupervisorError::Empty);
        }
        loop {
            if let Some(teardown) = self.poll(None)? {
                return Ok(teardown);
            }
        }
    }

    fn collapse(&mut self) -> Option<Teardown> {
        let (cause, status) = *self.state.exits.first()?;
        let killed = self.state.victims(cause);
        for role in &killed {
            if let Some(process) = self.state.processes.get_mut(role) {
                process.kill();
            }
        }
        info!(cause = %cause, killed = ?killed, "Process group torn down");
        Some(Teardown { cause, status, killed })
    }
}

impl Drop for ProcessGroupSupervisor {
    fn drop(&mut self) {
        for process in self.state.processes.values_mut().filter(|p| p.is_alive()) {
            process.kill();
        }
    }
}
