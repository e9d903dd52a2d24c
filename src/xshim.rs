/*
 * Steps of the X shim startup
 *
 * Sockets to create:
 * - a pair for Xwayland to connect to the compositor as a wayland client, the
 *   compositor gets one end, Xwayland the other through WAYLAND_SOCKET
 * - a pair for us to connect to the compositor and discover its outputs
 *
 * The compositor is started with the raw numbers of its two ends as
 * positional arguments:
 *   wayback-compositor <xwayland fd> <discovery fd>
 *
 * Once outputs are known, Xwayland gets started fullscreen with the size of
 * the primary output:
 *   Xwayland [:N] [-displayfd <fd>] -fullscreen -retro -geometry WxH
 *
 * With -displayfd, Xwayland reports the display it bound on that fd, which
 * is how whoever started us learns it. Without --display nor --displayfd we
 * scan for a free display ourselves.
 *
 * Compositor and Xwayland are then supervised together.
 */

use std::{
    ffi::OsString,
    os::{fd::OwnedFd, unix::net::UnixStream},
    path::PathBuf,
    process::Command,
};

use tracing::{debug, info};

use crate::{
    process::{pass_fd, set_cloexec, ProcessGroupSupervisor, Role, SupervisorError, Teardown},
    wayland::{DiscoveryError, OutputDiscovery},
    x11::{scan_for_free_display, XDisplay, X11_SOCKET_DIR},
};

/// Default compositor executable
pub const DEFAULT_COMPOSITOR: &str = "wayback-compositor";

/// Default Xwayland executable
pub const DEFAULT_XWAYLAND: &str = "Xwayland";

/// Configuration of the X shim
#[derive(Debug, Clone)]
pub struct XShimConfig {
    /// The compositor executable
    pub compositor: PathBuf,
    /// Arguments put before the descriptor numbers
    pub compositor_args: Vec<OsString>,
    /// The Xwayland executable
    pub xwayland: PathBuf,
    /// Display to run Xwayland on
    pub display: Option<XDisplay>,
    /// Where X servers put their sockets
    pub socket_dir: PathBuf,
}

impl Default for XShimConfig {
    fn default() -> XShimConfig {
        XShimConfig {
            compositor: PathBuf::from(DEFAULT_COMPOSITOR),
            compositor_args: Vec::new(),
            xwayland: PathBuf::from(DEFAULT_XWAYLAND),
            display: None,
            socket_dir: PathBuf::from(X11_SOCKET_DIR),
        }
    }
}

/// Errors of the X shim
#[derive(Debug, thiserror::Error)]
pub enum XShimError {
    /// The display descriptor can't be used
    #[error("invalid display descriptor")]
    DisplayFd(#[source] std::io::Error),
    /// A socket pair could not be created
    #[error("failed to create a socket pair")]
    Socket(#[source] std::io::Error),
    /// Supervising the processes failed
    #[error("failed to supervise the X server")]
    Supervisor(#[from] SupervisorError),
    /// The compositor's outputs could not be discovered
    #[error("failed to discover the compositor outputs")]
    Discovery(#[from] DiscoveryError),
}

/// Run the compositor and Xwayland until either exits
///
/// `displayfd` is the write end of a handshake channel Xwayland reports its
/// display on. It is only ever handed on to Xwayland, even when it was
/// inherited without `FD_CLOEXEC`.
pub fn run(config: XShimConfig, displayfd: Option<OwnedFd>) -> Result<Teardown, XShimError> {
    if let Some(fd) = &displayfd {
        set_cloexec(fd).map_err(|err| XShimError::DisplayFd(err.into()))?;
    }

    let display = match (config.display, &displayfd) {
        (Some(display), _) => Some(display),
        // Xwayland picks one and reports it
        (None, Some(_)) => None,
        (None, None) => Some(scan_for_free_display(&config.socket_dir)),
    };

    let (xwayland_compositor, xwayland_client) = UnixStream::pair().map_err(XShimError::Socket)?;
    let (discovery_compositor, discovery_client) = UnixStream::pair().map_err(XShimError::Socket)?;

    let mut supervisor = ProcessGroupSupervisor::new()?;

    let mut compositor = Command::new(&config.compositor);
    compositor.args(&config.compositor_args);
    let xwayland_fd = pass_fd(&mut compositor, xwayland_compositor.into());
    let discovery_fd = pass_fd(&mut compositor, discovery_compositor.into());
    compositor.arg(xwayland_fd.to_string()).arg(discovery_fd.to_string());
    debug!(xwayland_fd, discovery_fd, "Launching compositor");
    supervisor.spawn(Role::Compositor, compositor)?;

    let outputs = OutputDiscovery::from_socket(discovery_client)?.discover()?;
    let geometry = outputs.primary_geometry().map_err(DiscoveryError::from)?;
    if let Some(primary) = outputs.primary() {
        info!(output = ?primary.name(), %geometry, "Sizing X server after primary output");
    }

    let xwayland = xwayland_command(&config, display, displayfd, xwayland_client.into(), &geometry.to_string());
    supervisor.spawn(Role::XShim, xwayland)?;

    Ok(supervisor.wait()?)
}

/// Prepare the arguments and environment of Xwayland
fn xwayland_command(
    config: &XShimConfig,
    display: Option<XDisplay>,
    displayfd: Option<OwnedFd>,
    wayland_socket: OwnedFd,
    geometry: &str,
) -> Command {
    let mut command = Command::new(&config.xwayland);
    if let Some(display) = display {
        command.arg(display.to_string());
    }
    if let Some(displayfd) = displayfd {
        let fd = pass_fd(&mut command, displayfd);
        command.arg("-displayfd").arg(fd.to_string());
    }
    command.args(["-fullscreen", "-retro", "-geometry", geometry]);

    // the WAYLAND_SOCKET var tells Xwayland where to connect as a wayland client
    let fd = pass_fd(&mut command, wayland_socket);
    command.env("WAYLAND_SOCKET", fd.to_string()).env_remove("WAYLAND_DISPLAY");
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x11::handshake;
    use std::{
        ffi::OsStr,
        fs,
        os::fd::{AsRawFd, RawFd},
    };

    fn args(command: &Command) -> Vec<&OsStr> {
        command.get_args().collect()
    }

    #[test]
    fn xwayland_on_given_display() {
        let (_, socket) = UnixStream::pair().unwrap();
        let raw = socket.as_raw_fd();
        let command = xwayland_command(
            &XShimConfig::default(),
            Some(XDisplay::new(7)),
            None,
            socket.into(),
            "1920x1080",
        );

        assert_eq!(command.get_program(), "Xwayland");
        assert_eq!(args(&command), [":7", "-fullscreen", "-retro", "-geometry", "1920x1080"]);
        let wayland_socket = raw.to_string();
        assert!(command
            .get_envs()
            .any(|env| env == (OsStr::new("WAYLAND_SOCKET"), Some(OsStr::new(&wayland_socket)))));
        assert!(command
            .get_envs()
            .any(|env| env == (OsStr::new("WAYLAND_DISPLAY"), None)));
    }

    #[test]
    fn xwayland_reports_display() {
        let (_, socket) = UnixStream::pair().unwrap();
        let (_reader, writer) = handshake::channel().unwrap();
        let displayfd = OwnedFd::from(writer);
        let raw = displayfd.as_raw_fd().to_string();
        let command = xwayland_command(&XShimConfig::default(), None, Some(displayfd), socket.into(), "800x600");

        assert_eq!(
            args(&command),
            ["-displayfd", raw.as_str(), "-fullscreen", "-retro", "-geometry", "800x600"]
        );
    }

    #[test]
    fn missing_compositor() {
        let dir = tempfile::tempdir().unwrap();
        let config = XShimConfig {
            compositor: dir.path().join("wayback-compositor"),
            socket_dir: dir.path().to_owned(),
            ..XShimConfig::default()
        };
        assert!(matches!(
            run(config, None),
            Err(XShimError::Supervisor(SupervisorError::Spawn {
                role: Role::Compositor,
                ..
            }))
        ));
    }

    #[test]
    fn display_fd_not_leaked_to_compositor() {
        use rustix::io::{fcntl_setfd, FdFlags};

        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("fds");
        // the compositor records its open descriptors and hangs up
        let script = format!("ls /proc/$$/fd > '{}'", listing.display());

        // inherited from our parent, which cleared FD_CLOEXEC on it
        let (_reader, writer) = handshake::channel().unwrap();
        let displayfd = OwnedFd::from(writer);
        fcntl_setfd(&displayfd, FdFlags::empty()).unwrap();
        let raw = displayfd.as_raw_fd();

        let config = XShimConfig {
            compositor: PathBuf::from("sh"),
            compositor_args: vec!["-c".into(), script.into(), "sh".into()],
            socket_dir: dir.path().to_owned(),
            ..XShimConfig::default()
        };
        assert!(matches!(run(config, Some(displayfd)), Err(XShimError::Discovery(_))));

        let fds: Vec<RawFd> = fs::read_to_string(&listing)
            .unwrap()
            .lines()
            .map(|fd| fd.parse().unwrap())
            .collect();
        assert!(fds.len() > 3, "compositor sockets missing from {:?}", fds);
        assert!(!fds.contains(&raw), "display fd {} leaked into {:?}", raw, fds);
    }

    #[test]
    fn compositor_without_outputs() {
        // a "compositor" that hangs up right away
        let dir = tempfile::tempdir().unwrap();
        let config = XShimConfig {
            compositor: PathBuf::from("true"),
            socket_dir: dir.path().to_owned(),
            ..XShimConfig::default()
        };
        assert!(matches!(run(config, None), Err(XShimError::Discovery(_))));
    }
}
