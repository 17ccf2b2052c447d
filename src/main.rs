//! lamco-rail-bridge - Remote application session bridge
//!
//! Entry point for the bridge binary.

use anyhow::Result;
use clap::Parser;
use lamco_rail_bridge::{Bridge, Config};
use tracing::{info, warn};

/// Command-line arguments for lamco-rail-bridge
#[derive(Parser, Debug)]
#[command(name = "lamco-rail-bridge")]
#[command(version, about = "Remote application session bridge", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LAMCO_RAIL_CONFIG")]
    pub config: Option<String>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(|| {
        lamco_rail_bridge::config::default_config_path()
            .display()
            .to_string()
    });

    // Missing config file is fine; defaults cover a single-monitor setup.
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            let config = Config::default();
            if std::path::Path::new(&config_path).exists() {
                return Err(err);
            }
            eprintln!("No config at {config_path}, using defaults");
            config
        }
    };

    lamco_rail_bridge::telemetry::init_logging(&config, args.verbose)?;
    lamco_rail_bridge::telemetry::log_startup(&config);

    let (bridge, handle) = Bridge::new(&config);
    let loop_thread = std::thread::Builder::new()
        .name("bridge-loop".to_string())
        .spawn(move || bridge.run())?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    handle.shutdown();

    if loop_thread.join().is_err() {
        warn!("bridge loop panicked during shutdown");
    }
    Ok(())
}
