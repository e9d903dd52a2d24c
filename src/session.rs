//! Session launching
//!
//! [`launch`] drives a whole wayback session: it picks a display, starts the X
//! shim (`Xwayback`, which brings up the compositor and Xwayland on its own),
//! waits for the display to become usable, then runs the user session on it.
//! The shim and the session are supervised together, whichever exits first
//! takes the other one down.
//!
//! What to run as the session is a [`SessionCommand`]: either the command
//! given on the command line, or an `xinitrc` script.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use rustix::fs::{access, Access};
use tracing::{debug, info};

use crate::{
    process::{pass_fd, ProcessGroupSupervisor, Role, SupervisorError, Teardown},
    x11::{
        handshake::{self, HandshakeError},
        scan_for_free_display, wait_for_socket, Allocation, Readiness, ReadinessError, ReadinessPolicy,
        XDisplay, X11_SOCKET_DIR,
    },
};

/// System-wide session script, used when the user has none
pub const SYSTEM_XINITRC: &str = "/etc/X11/xinit/xinitrc";

/// Default X shim executable
pub const DEFAULT_X_SHIM: &str = "Xwayback";

/// What runs as the user session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// A script run with `sh`
    Xinitrc(PathBuf),
    /// An executable and its arguments, run as given
    Exec {
        /// The executable, looked up in `PATH`
        program: OsString,
        /// Its arguments
        args: Vec<OsString>,
    },
}

/// Errors resolving the session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No command was given and no xinitrc is readable
    #[error("unable to find an xinitrc file, tried ~/.xinitrc and {}", SYSTEM_XINITRC)]
    NoXinitrc,
}

impl SessionCommand {
    /// Pick the session to run
    ///
    /// A non-empty `args` is used verbatim. Otherwise falls back to
    /// `$HOME/.xinitrc`, then to [`SYSTEM_XINITRC`].
    pub fn resolve(args: Vec<OsString>) -> Result<SessionCommand, SessionError> {
        let home = env::var_os("HOME").map(PathBuf::from);
        SessionCommand::resolve_with(args, home.as_deref(), Path::new(SYSTEM_XINITRC))
    }

    /// [`resolve`](Self::resolve) with explicit fallback locations
    pub fn resolve_with(
        args: Vec<OsString>,
        home: Option<&Path>,
        system_xinitrc: &Path,
    ) -> Result<SessionCommand, SessionError> {
        let mut args = args.into_iter();
        if let Some(program) = args.next() {
            return Ok(SessionCommand::Exec {
                program,
                args: args.collect(),
            });
        }

        let user_xinitrc = home.map(|home| home.join(".xinitrc"));
        user_xinitrc
            .into_iter()
            .chain(Some(system_xinitrc.to_owned()))
            .find(|path| is_readable(path))
            .map(SessionCommand::Xinitrc)
            .ok_or(SessionError::NoXinitrc)
    }

    /// The command running this session on `display`
    ///
    /// Toolkits are steered to X11: `WAYLAND_DISPLAY` is emptied so they
    /// don't find the compositor.
    pub fn command(&self, display: XDisplay) -> Command {
        let mut command = match self {
            SessionCommand::Xinitrc(path) => {
                let mut command = Command::new("sh");
                command.arg(path);
                command
            }
            SessionCommand::Exec { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };
        command
            .env("XDG_SESSION_TYPE", "x11")
            .env("WAYLAND_DISPLAY", "")
            .env("DISPLAY", display.to_string());
        command
    }
}

fn is_readable(path: &Path) -> bool {
    access(path, Access::EXISTS | Access::READ_OK).is_ok()
}

/// Everything [`launch`] needs to know
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// How to pick the display
    pub allocation: Allocation,
    /// What to run once the display is up
    pub session: SessionCommand,
    /// The X shim executable
    pub x_shim: PathBuf,
    /// Arguments put before the ones wayback adds
    pub x_shim_args: Vec<OsString>,
    /// Where X servers put their sockets
    pub socket_dir: PathBuf,
    /// Bounds of the wait for the X shim's socket
    pub readiness: ReadinessPolicy,
}

impl LaunchConfig {
    /// Default configuration for running `session`
    pub fn new(session: SessionCommand) -> LaunchConfig {
        LaunchConfig {
            allocation: Allocation::Scan,
            session,
            x_shim: PathBuf::from(DEFAULT_X_SHIM),
            x_shim_args: Vec::new(),
            socket_dir: PathBuf::from(X11_SOCKET_DIR),
            readiness: ReadinessPolicy::default(),
        }
    }
}

/// Errors of [`launch`]
///
/// All of them are setup failures. A member that can't be executed is one
/// too: it is reported here by [`SupervisorError::Spawn`] instead of showing
/// up as an exit that tears the group down, and the members already running
/// are killed.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Supervising the processes failed, or a member could not be executed
    #[error("failed to supervise the session")]
    Supervisor(#[from] SupervisorError),
    /// The X shim did not report its display
    #[error("the X shim failed to start")]
    Handshake(#[from] HandshakeError),
    /// The X shim did not create its socket
    #[error("the X shim failed to start")]
    Readiness(#[from] ReadinessError),
}

/// Run a session to completion
///
/// Returns once the X shim or the session exited and the other one was
/// killed.
pub fn launch(config: LaunchConfig) -> Result<Teardown, LaunchError> {
    let mut supervisor = ProcessGroupSupervisor::new()?;
    let mut x_shim = Command::new(&config.x_shim);
    x_shim.args(&config.x_shim_args);

    let known = match config.allocation {
        Allocation::Explicit(display) => Some(display),
        Allocation::Scan => Some(scan_for_free_display(&config.socket_dir)),
        Allocation::Handshake => None,
    };

    let x_display = match known {
        Some(display) => {
            x_shim.arg("--display").arg(display.to_string());
            supervisor.spawn(Role::XShim, x_shim)?;

            let socket = display.socket_path_in(&config.socket_dir);
            if let Readiness::Collapsed(teardown) = wait_for_socket(&mut supervisor, &socket, config.readiness)? {
                info!(cause = %teardown.cause, "X shim exited before the session started");
                return Ok(teardown);
            }
            display
        }
        None => {
            let (reader, writer) = handshake::channel()?;
            let fd = pass_fd(&mut x_shim, writer.into());
            x_shim.arg("--displayfd").arg(fd.to_string());
            debug!(fd, "Launching X shim with display fd");
            // drops our copy of the write end
            supervisor.spawn(Role::XShim, x_shim)?;

            let reported = reader.read_display()?;
            info!(display = %reported, "Received display");
            reported
        }
    };

    info!(display = %x_display, session = ?config.session, "Launching session");
    supervisor.spawn(Role::Session, config.session.command(x_display))?;
    Ok(supervisor.wait()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{ffi::OsStr, fs};

    #[test]
    fn explicit_command_wins() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(".xinitrc"), "exec xterm\n").unwrap();
        let args = vec![OsString::from("myapp"), OsString::from("--flag")];
        let session = SessionCommand::resolve_with(args, Some(home.path()), Path::new("/nonexistent")).unwrap();
        assert_eq!(
            session,
            SessionCommand::Exec {
                program: "myapp".into(),
                args: vec!["--flag".into()],
            }
        );
    }

    #[test]
    fn user_xinitrc_first() {
        let home = tempfile::tempdir().unwrap();
        let system = tempfile::NamedTempFile::new().unwrap();
        fs::write(home.path().join(".xinitrc"), "exec xterm\n").unwrap();
        let session = SessionCommand::resolve_with(Vec::new(), Some(home.path()), system.path()).unwrap();
        assert_eq!(session, SessionCommand::Xinitrc(home.path().join(".xinitrc")));
    }

    #[test]
    fn system_xinitrc_fallback() {
        let home = tempfile::tempdir().unwrap();
        let system = tempfile::NamedTempFile::new().unwrap();
        let session = SessionCommand::resolve_with(Vec::new(), Some(home.path()), system.path()).unwrap();
        assert_eq!(session, SessionCommand::Xinitrc(system.path().to_owned()));

        let session = SessionCommand::resolve_with(Vec::new(), None, system.path()).unwrap();
        assert_eq!(session, SessionCommand::Xinitrc(system.path().to_owned()));
    }

    #[test]
    fn no_xinitrc() {
        let home = tempfile::tempdir().unwrap();
        let err = SessionCommand::resolve_with(Vec::new(), Some(home.path()), &home.path().join("xinitrc"));
        assert!(matches!(err, Err(SessionError::NoXinitrc)));
    }

    #[test]
    fn session_environment() {
        let command = SessionCommand::Xinitrc(PathBuf::from("/home/me/.xinitrc")).command(XDisplay::new(0));
        assert_eq!(command.get_program(), "sh");
        assert_eq!(command.get_args().collect::<Vec<_>>(), ["/home/me/.xinitrc"]);

        let envs: Vec<(&OsStr, Option<&OsStr>)> = command.get_envs().collect();
        for (key, value) in [("XDG_SESSION_TYPE", "x11"), ("WAYLAND_DISPLAY", ""), ("DISPLAY", ":0")] {
            assert!(envs.contains(&(OsStr::new(key), Some(OsStr::new(value)))), "{key} not set");
        }
    }

    #[test]
    fn exec_session_command() {
        let session = SessionCommand::Exec {
            program: "myapp".into(),
            args: vec!["--flag".into()],
        };
        let command = session.command(XDisplay::new(7));
        assert_eq!(command.get_program(), "myapp");
        assert_eq!(command.get_args().collect::<Vec<_>>(), ["--flag"]);
    }
}
