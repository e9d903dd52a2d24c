use std::{
    ffi::OsStr,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::process::{ProcessGroupSupervisor, SupervisorError, Teardown};

/// Directory X servers create their listening sockets in
pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// An X11 display number
///
/// Formats as `:N`, the value expected in `$DISPLAY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XDisplay(u32);

impl XDisplay {
    /// Wrap a raw display number
    pub fn new(number: u32) -> XDisplay {
        XDisplay(number)
    }

    /// The raw display number
    pub fn number(&self) -> u32 {
        self.0
    }

    /// Path of the socket an X server listens on for this display
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path_in(Path::new(X11_SOCKET_DIR))
    }

    /// Path of this display's socket inside `dir`
    pub fn socket_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("X{}", self.0))
    }
}

impl fmt::Display for XDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Errors of display parsing
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The display string is not `:N` (or `N`) with `N` a decimal number
    #[error("malformed display `{0}`, expected `:N`")]
    Malformed(String),
}

impl FromStr for XDisplay {
    type Err = DisplayError;

    /// Parses `:N` or a bare `N`.
    ///
    /// Anything else, including screen suffixes like `:1.0`, is rejected.
    fn from_str(s: &str) -> Result<XDisplay, DisplayError> {
        let digits = s.strip_prefix(':').unwrap_or(s);
        parse_digits(digits)
            .map(XDisplay)
            .ok_or_else(|| DisplayError::Malformed(s.to_owned()))
    }
}

fn parse_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// How the display of a new X server gets chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Use the given display
    Explicit(XDisplay),
    /// Pick the display after the highest one present in the socket directory
    Scan,
    /// Let the X server pick and report it back over a handshake channel
    Handshake,
}

/// Find the display following every display that has a socket in `dir`
///
/// Falls back to `:0` when the directory can't be read or holds no X sockets.
pub fn scan_for_free_display(dir: &Path) -> XDisplay {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            info!(dir = %dir.display(), "Unable to read X11 socket directory ({}), defaulting to :0", err);
            return XDisplay(0);
        }
    };

    let highest = entries
        .filter_map(Result::ok)
        .filter_map(|entry| display_from_socket_name(&entry.file_name()))
        .max();

    match highest {
        Some(XDisplay(n)) => match n.checked_add(1) {
            Some(next) => {
                debug!(display = next, "Found free X11 display");
                XDisplay(next)
            }
            None => {
                warn!("X11 display numbers exhausted, defaulting to :0");
                XDisplay(0)
            }
        },
        None => {
            info!("No free display found, defaulting to :0");
            XDisplay(0)
        }
    }
}

// `X` followed by one or more decimal digits
fn display_from_socket_name(name: &OsStr) -> Option<XDisplay> {
    let digits = name.to_str()?.strip_prefix('X')?;
    parse_digits(digits).map(XDisplay)
}

/// Bounds of the socket readiness gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// First pause between two checks
    pub initial_delay: Duration,
    /// The pause doubles after every check up to this value
    pub max_delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(10),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

/// Outcome of [`wait_for_socket`]
#[derive(Debug)]
pub enum Readiness {
    /// The socket exists
    Ready,
    /// A supervised process exited while waiting and the group was torn down
    Collapsed(Teardown),
}

/// Errors of the readiness gate
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// The socket did not show up in time
    #[error("X11 socket {} did not appear within {waited:?}", .path.display())]
    Timeout {
        /// The socket that was awaited
        path: PathBuf,
        /// How long we waited
        waited: Duration,
    },
    /// Supervising the group failed while waiting
    #[error("failed to supervise the process group")]
    Supervisor(#[from] SupervisorError),
}

/// Wait until `socket` exists, backing off exponentially between checks
///
/// Exits of supervised processes are still handled while waiting: if one
/// occurs the group collapses and [`Readiness::Collapsed`] is returned.
pub fn wait_for_socket(
    supervisor: &mut ProcessGroupSupervisor,
    socket: &Path,
    policy: ReadinessPolicy,
) -> Result<Readiness, ReadinessError> {
    let started = Instant::now();
    let mut delay = policy.initial_delay;

    loop {
        if fs::symlink_metadata(socket).is_ok() {
            debug!(socket = %socket.display(), waited = ?started.elapsed(), "X11 socket is ready");
            return Ok(Readiness::Ready);
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(ReadinessError::Timeout {
                path: socket.to_owned(),
                waited,
            });
        }

        if let Some(teardown) = supervisor.poll(Some(delay.min(policy.timeout - waited)))? {
            return Ok(Readiness::Collapsed(teardown));
        }
        delay = (delay * 2).min(policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Role;
    use std::process::Command;

    fn touch(dir: &Path, name: &str) {
        fs::File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn parse_explicit_display() {
        assert_eq!(":7".parse::<XDisplay>().unwrap(), XDisplay(7));
        assert_eq!("12".parse::<XDisplay>().unwrap(), XDisplay(12));
        assert_eq!(":0".parse::<XDisplay>().unwrap().to_string(), ":0");
    }

    #[test]
    fn reject_malformed_display() {
        for bad in [":abc", ":", "", ":1.0", ":+3", ":-1", "X1", ":99999999999"] {
            assert!(bad.parse::<XDisplay>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn socket_path() {
        assert_eq!(XDisplay(3).socket_path(), PathBuf::from("/tmp/.X11-unix/X3"));
    }

    #[test]
    fn scan_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_for_free_display(dir.path()), XDisplay(0));
    }

    #[test]
    fn scan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_for_free_display(&dir.path().join("nope")), XDisplay(0));
    }

    #[test]
    fn scan_picks_after_highest() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["X0", "X1", "X3"] {
            touch(dir.path(), name);
        }
        assert_eq!(scan_for_free_display(dir.path()), XDisplay(4));
    }

    #[test]
    fn scan_ignores_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["X2", "X10-lock", "Xfoo", "X", "Y40", ".X99"] {
            touch(dir.path(), name);
        }
        assert_eq!(scan_for_free_display(dir.path()), XDisplay(3));
    }

    #[test]
    fn ready_when_socket_exists() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "X5");
        let mut supervisor = ProcessGroupSupervisor::new().unwrap();
        let readiness = wait_for_socket(
            &mut supervisor,
            &XDisplay(5).socket_path_in(dir.path()),
            ReadinessPolicy::default(),
        )
        .unwrap();
        assert!(matches!(readiness, Readiness::Ready));
    }

    #[test]
    fn ready_once_socket_appears() {
        let dir = tempfile::tempdir().unwrap();
        let socket = XDisplay(7).socket_path_in(dir.path());
        let mut supervisor = ProcessGroupSupervisor::new().unwrap();
        let mut shim = Command::new("sh");
        shim.arg("-c")
            .arg("sleep 0.2; touch \"$1\"; exec sleep 30")
            .arg("sh")
            .arg(&socket);
        supervisor.spawn(Role::XShim, shim).unwrap();

        let readiness = wait_for_socket(&mut supervisor, &socket, ReadinessPolicy::default()).unwrap();
        assert!(matches!(readiness, Readiness::Ready));
    }

    #[test]
    fn gate_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = ProcessGroupSupervisor::new().unwrap();
        let policy = ReadinessPolicy {
            timeout: Duration::from_millis(100),
            ..ReadinessPolicy::default()
        };
        let err = wait_for_socket(&mut supervisor, &dir.path().join("X9"), policy).unwrap_err();
        assert!(matches!(err, ReadinessError::Timeout { .. }));
    }

    #[test]
    fn gate_observes_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = ProcessGroupSupervisor::new().unwrap();
        supervisor.spawn(Role::XShim, Command::new("true")).unwrap();

        let readiness =
            wait_for_socket(&mut supervisor, &dir.path().join("X1"), ReadinessPolicy::default()).unwrap();
        match readiness {
            Readiness::Collapsed(teardown) => {
                assert_eq!(teardown.cause, Role::XShim);
                assert!(teardown.killed.is_empty());
            }
            Readiness::Ready => panic!("socket never existed"),
        }
    }
}
