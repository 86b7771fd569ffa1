use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde_json::json;

use ipc_toolkit::config::loader::load_settings;
use ipc_toolkit::config::IpcConfig;
use ipc_toolkit::observability::init_logging;
use ipc_toolkit::server::SharedState;
use ipc_toolkit::signal::{SignalControl, Target};

#[derive(Parser)]
#[command(name = "ipcctl")]
#[command(about = "Control a running ipc-toolkit server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StateArgs {
    /// Read the ipc section from this settings file instead of the flags below
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    ipc_path: PathBuf,

    #[arg(long, default_value_t = 1)]
    shm_id: u8,

    #[arg(long, default_value_t = 2)]
    sem_id: u8,
}

impl StateArgs {
    fn ipc(&self) -> Result<IpcConfig, Box<dyn std::error::Error>> {
        if let Some(path) = &self.settings {
            return Ok(load_settings(path)?.ipc);
        }
        Ok(IpcConfig {
            path: self.ipc_path.clone(),
            shm_id: self.shm_id,
            sem_id: self.sem_id,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the server to re-read its key=value file
    Reload { pid: i32 },
    /// Ask the server to stop accepting and exit
    Stop { pid: i32 },
    /// Print the live tunables and client count as JSON
    Status(StateArgs),
    /// Remove the shared segment and semaphore left by a dead server
    Remove(StateArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("warn");
    let cli = Cli::parse();
    let control = SignalControl::global();

    match cli.command {
        Commands::Reload { pid } => {
            control.raise(Target::Process(Pid::from_raw(pid)), Signal::SIGHUP)?;
            println!("Reload requested from {}", pid);
        }
        Commands::Stop { pid } => {
            control.raise(Target::Process(Pid::from_raw(pid)), Signal::SIGTERM)?;
            println!("Stop requested from {}", pid);
        }
        Commands::Status(args) => {
            let ipc = args.ipc()?;
            let state = SharedState::attach(&ipc)?;
            let data = state.snapshot()?;
            let report = json!({
                "ipc_path": ipc.path.display().to_string(),
                "shm_id": ipc.shm_id,
                "sem_id": ipc.sem_id,
                "state": data,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Remove(args) => {
            let state = SharedState::attach(&args.ipc()?)?;
            state.destroy()?;
            println!("Shared state removed");
        }
    }

    Ok(())
}
