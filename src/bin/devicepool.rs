//! devicepool - CLI front end over `DeviceManager`. Owns process lifetime
//! only; all behavior lives in the library.

use anyhow::Result;
use clap::{Parser, Subcommand};
use devicepool::bridge::Bridge;
use devicepool::process::TokioProcessRunner;
use devicepool::{Config, DeviceManager};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "devicepool", version, about = "Device pool manager for an on-host test harness")]
struct Cli {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known devices and their allocation/observed state.
    ListDevices {
        #[arg(long)]
        json: bool,
    },
    /// Disconnect from the adb server without restarting it.
    StopAdbBridge,
    /// Restart the adb server.
    RestartAdbBridge,
    /// Shut down the pool manager, releasing all devices and background tasks.
    Terminate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
            .format_timestamp_secs()
            .init();
    }

    let config = Config::load(cli.config)?;

    // The bridge adapter over a real adb connection library is outside this
    // crate's scope (see SPEC_FULL.md §4.2); this CLI exists to exercise
    // `DeviceManager`'s lifecycle hooks against whatever bridge the host
    // process wires up, not to implement one.
    let bridge: Arc<dyn Bridge> = no_bridge_configured()?;
    let process = Arc::new(TokioProcessRunner::new());
    let manager = DeviceManager::new(bridge, process, config);
    let factory = manager.default_factory();
    manager.init(None, Vec::new(), factory).await?;

    match cli.command {
        Command::ListDevices { json } => {
            let devices = manager.list_all().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                for d in &devices {
                    println!("{}\t{:?}\t{:?}\t{}", d.serial, d.allocation, d.observed, d.kind);
                }
            }
        }
        Command::StopAdbBridge => manager.stop_adb_bridge().await,
        Command::RestartAdbBridge => manager.restart_adb_bridge().await?,
        Command::Terminate => manager.terminate().await,
    }

    Ok(())
}

fn no_bridge_configured() -> Result<Arc<dyn Bridge>> {
    anyhow::bail!(
        "no adb bridge adapter configured; this binary is a thin front end over \
         DeviceManager and expects a host integration to supply one"
    )
}
