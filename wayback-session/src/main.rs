use std::{error::Error, ffi::OsString, path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use tracing::{error, info};
use wayback::{
    session::{self, LaunchConfig, SessionCommand, DEFAULT_X_SHIM},
    x11::{Allocation, ReadinessPolicy, XDisplay},
};

/// Run an X11 session on a nested Wayland compositor
#[derive(Parser, Debug)]
#[command(name = "wayback-session", version, about)]
struct Cli {
    /// Display to run the X server on, like `:1`. By default the first free one is picked
    #[arg(short, long, value_name = ":N", conflicts_with = "displayfd")]
    display: Option<XDisplay>,

    /// Let the X server pick a display and report it back
    #[arg(long)]
    displayfd: bool,

    /// X server shim to run
    #[arg(long, value_name = "PATH", env = "WAYBACK_XSHIM", default_value = DEFAULT_X_SHIM)]
    x_shim: PathBuf,

    /// Seconds to wait for the X server socket
    #[arg(long, value_name = "SECS", env = "WAYBACK_READY_TIMEOUT", default_value_t = 10)]
    ready_timeout: u64,

    /// Session to run, defaults to ~/.xinitrc or the system xinitrc
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    session: Vec<OsString>,
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

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let session = SessionCommand::resolve(cli.session)?;
    let allocation = match (cli.display, cli.displayfd) {
        (Some(display), _) => Allocation::Explicit(display),
        (None, true) => Allocation::Handshake,
        (None, false) => Allocation::Scan,
    };

    let config = LaunchConfig {
        allocation,
        x_shim: cli.x_shim,
        readiness: ReadinessPolicy {
            timeout: Duration::from_secs(cli.ready_timeout),
            ..ReadinessPolicy::default()
        },
        ..LaunchConfig::new(session)
    };

    let teardown = session::launch(config)?;
    info!(cause = %teardown.cause, killed = ?teardown.killed, "Session over");
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
