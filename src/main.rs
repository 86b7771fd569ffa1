//! ipc-toolkit server (v1)
//!
//! A fork-per-connection TCP echo server whose live configuration sits in a
//! shared memory segment guarded by a semaphore.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!   SIGHUP ───────▶│  reload flag ─▶ re-read key=value file       │
//!   SIGTERM/INT ──▶│  stop flag                                    │
//!                  │                                               │
//!   Client ───────▶│  listener ─▶ accept ─▶ fork ─┐                │
//!                  │                               ▼               │
//!                  │                       child: admit, echo,     │
//!                  │                       release, exit 0         │
//!                  │                                               │
//!                  │  ┌────────────────────────────────────────┐   │
//!                  │  │ shared segment (tunables, clients)      │   │
//!                  │  │ semaphore (guards the segment)          │   │
//!                  │  └────────────────────────────────────────┘   │
//!                  └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ipc_toolkit::config::loader::load_settings;
use ipc_toolkit::config::ServerSettings;
use ipc_toolkit::lifecycle::bootstrap;
use ipc_toolkit::observability::init_logging;
use ipc_toolkit::server::{ConnectionServer, EchoHandler};

#[derive(Parser)]
#[command(name = "ipc-toolkit")]
#[command(about = "Fork-per-connection echo server with signal-driven reload", long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the key=value file re-read on SIGHUP
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override ipc.path
    #[arg(long)]
    ipc_path: Option<PathBuf>,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => ServerSettings::default(),
    };
    if let Some(bind) = args.bind {
        settings.listener.bind_address = bind;
    }
    if let Some(config) = args.config {
        settings.config_file = config;
    }
    if let Some(path) = args.ipc_path {
        settings.ipc.path = path;
    }
    if let Some(level) = args.log_level {
        settings.observability.log_level = level;
    }

    init_logging(&settings.observability.log_level);
    tracing::info!(pid = std::process::id(), "ipc-toolkit v0.1.0 starting");

    let startup = bootstrap(&settings).inspect_err(|e| tracing::error!(error = %e, "Startup failed"))?;

    let mut state = startup.state;
    let result = ConnectionServer::new(startup.listener, &mut state, &settings.config_file, EchoHandler).run();

    if let Err(e) = state.destroy() {
        tracing::warn!(error = %e, "Failed to remove shared state");
    }

    result.inspect_err(|e| tracing::error!(error = %e, "Server failed"))?;

    tracing::info!("Shutdown complete");
    Ok(())
}
