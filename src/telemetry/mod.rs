//! Diagnostics and log setup
//!
//! Tracing initialization plus the capacity dumps operators ask for when a
//! session starts refusing window IDs.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::session::Session;

/// Initialize the global tracing subscriber. The `RUST_LOG` environment
/// variable wins over the configured level.
pub fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;
    Ok(())
}

/// Log the effective configuration at startup.
pub fn log_startup(config: &Config) {
    info!("lamco-rail-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Built: {} {}",
        option_env!("BUILD_DATE").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("")
    );
    info!("  Commit: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    info!(
        repaint_interval_ms = config.bridge.repaint_interval_ms,
        closing_timeout_secs = config.bridge.closing_timeout_secs,
        zorder_sync = config.bridge.zorder_sync,
        "bridge loop configured"
    );
    info!(
        window_ids = format_args!(
            "{:#x}..={:#x}",
            config.session.window_id_low, config.session.window_id_high
        ),
        shared_memory = config.session.shared_memory,
        "session ID ranges configured"
    );
}

/// Dump one session's ID table occupancy. Called when an allocation fails
/// or from a diagnostics request.
pub fn dump_session_tables(session: &Session) {
    for (label, usage) in session.table_usage() {
        info!(
            session = %session.id(),
            table = label,
            used = usage.used,
            total = usage.total,
            "ID table usage"
        );
    }
}
