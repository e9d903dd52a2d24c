use std::{
    error::Error,
    io,
    os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use tracing::{error, info};
use wayback::{
    x11::XDisplay,
    xshim::{self, XShimConfig, DEFAULT_COMPOSITOR, DEFAULT_XWAYLAND},
};

/// X server shim: runs Xwayland fullscreen on a nested Wayland compositor
#[derive(Parser, Debug)]
#[command(name = "Xwayback", version, about)]
struct Cli {
    /// Display to run Xwayland on, like `:1`
    #[arg(long, value_name = ":N")]
    display: Option<XDisplay>,

    /// Descriptor Xwayland reports its display number on
    #[arg(long, value_name = "FD")]
    displayfd: Option<RawFd>,

    /// Compositor to run
    #[arg(long, value_name = "PATH", env = "WAYBACK_COMPOSITOR", default_value = DEFAULT_COMPOSITOR)]
    compositor: PathBuf,

    /// Xwayland executable
    #[arg(long, value_name = "PATH", env = "WAYBACK_XWAYLAND", default_value = DEFAULT_XWAYLAND)]
    xwayland: PathBuf,
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &dyn Error) {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    error!("{}", message);
}

/// Take ownership of the inherited display descriptor
fn inherited_fd(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative descriptor"));
    }
    // SAFETY: the fd is only borrowed to check that it is open
    rustix::io::fcntl_getfd(unsafe { BorrowedFd::borrow_raw(fd) })?;
    // SAFETY: the descriptor is open and was handed to us, nothing else in this process owns it
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let displayfd = cli
        .displayfd
        .map(inherited_fd)
        .transpose()
        .map_err(|err| format!("invalid --displayfd: {}", err))?;

    let config = XShimConfig {
        compositor: cli.compositor,
        xwayland: cli.xwayland,
        display: cli.display,
        ..XShimConfig::default()
    };

    let teardown = xshim::run(config, displayfd)?;
    info!(cause = %teardown.cause, killed = ?teardown.killed, "X server shut down");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(err.as_ref());
            ExitCode::FAILURE
        }
    }
}
