//! Configuration management
//!
//! Handles loading and validation of configuration from:
//! - TOML files
//! - CLI arguments (overrides applied in `main`)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::MARKER_WINDOW_ID;
use crate::session::SessionLimits;

/// Default config location: XDG config dir, falling back to /etc.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir().map_or_else(
        || PathBuf::from("/etc/lamco-rail-bridge/config.toml"),
        |d| d.join("lamco-rail-bridge/config.toml"),
    )
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bridge loop configuration
    pub bridge: BridgeConfig,
    /// Per-session ID table configuration
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Compositor-loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Repaint interval in milliseconds; z-order updates and the
    /// closing-timeout scan run on this cadence
    pub repaint_interval_ms: u64,
    /// Seconds a window may sit in Closing before it is reported
    /// unresponsive
    pub closing_timeout_secs: u64,
    /// Send coalesced stacking-order updates to peers
    pub zorder_sync: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            repaint_interval_ms: 16,
            closing_timeout_secs: 10,
            zorder_sync: true,
        }
    }
}

/// ID table ranges handed to each new session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lowest window ID handed to peers (must be nonzero)
    pub window_id_low: u32,
    /// Highest window ID handed to peers (must stay below the reserved
    /// marker IDs)
    pub window_id_high: u32,
    /// Lowest graphics surface ID
    pub surface_id_low: u32,
    /// Highest graphics surface ID
    pub surface_id_high: u32,
    /// Enable shared-memory pool/buffer tables
    pub shared_memory: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            window_id_low: limits.window_id_low,
            window_id_high: limits.window_id_high,
            surface_id_low: limits.surface_id_low,
            surface_id_high: limits.surface_id_high,
            shared_memory: limits.shared_memory,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace|debug|info|warn|error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read config file: {path}"))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bridge.repaint_interval_ms == 0 {
            anyhow::bail!("bridge.repaint_interval_ms must be nonzero");
        }
        if self.session.window_id_low == 0 {
            anyhow::bail!("session.window_id_low must be nonzero (0 is not a valid window ID)");
        }
        if self.session.window_id_low > self.session.window_id_high {
            anyhow::bail!(
                "session.window_id_low ({}) exceeds window_id_high ({})",
                self.session.window_id_low,
                self.session.window_id_high
            );
        }
        if self.session.window_id_high >= MARKER_WINDOW_ID {
            anyhow::bail!(
                "session.window_id_high ({:#x}) collides with the reserved marker IDs",
                self.session.window_id_high
            );
        }
        if self.session.surface_id_low > self.session.surface_id_high {
            anyhow::bail!(
                "session.surface_id_low ({}) exceeds surface_id_high ({})",
                self.session.surface_id_low,
                self.session.surface_id_high
            );
        }
        Ok(())
    }

    /// The ID table limits handed to each new session.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            window_id_low: self.session.window_id_low,
            window_id_high: self.session.window_id_high,
            surface_id_low: self.session.surface_id_low,
            surface_id_high: self.session.surface_id_high,
            shared_memory: self.session.shared_memory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_from(content: &str) -> Result<Config> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        Config::load(file.path().to_str().unwrap())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.bridge.repaint_interval_ms, 16);
        assert!(config.bridge.zorder_sync);
        assert!(!config.session.shared_memory);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = load_from(
            r#"
            [bridge]
            closing_timeout_secs = 30

            [session]
            shared_memory = true
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.closing_timeout_secs, 30);
        assert_eq!(config.bridge.repaint_interval_ms, 16);
        assert!(config.session.shared_memory);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_zero_window_id_low() {
        let err = load_from("[session]\nwindow_id_low = 0\n").unwrap_err();
        assert!(err.to_string().contains("window_id_low"));
    }

    #[test]
    fn test_rejects_window_range_into_reserved_ids() {
        let err = load_from("[session]\nwindow_id_high = 0xFFFFFFFF\n").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_rejects_inverted_surface_range() {
        let err = load_from("[session]\nsurface_id_low = 100\nsurface_id_high = 10\n").unwrap_err();
        assert!(err.to_string().contains("surface_id_low"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/config.toml").is_err());
    }
}
