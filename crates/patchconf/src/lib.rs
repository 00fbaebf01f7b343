//! Layered configuration loading for patchbay.
//!
//! Kept dependency-light so every patchbay crate can import it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use patchconf::PatchbayConfig;
//!
//! let config = PatchbayConfig::load().expect("Failed to load config");
//! println!("channels: {}", config.engine.default_channel_count);
//! println!("log level: {}", config.telemetry.log_level);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/patchbay/config.toml` (system)
//! 2. `~/.config/patchbay/config.toml` (user)
//! 3. `./patchbay.toml` (local override, or an explicit path)
//! 4. Environment variables (`PATCHBAY_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [engine]
//! default_channel_count = 2
//! sync_timeout_ms = 5000
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod engine;
pub mod loader;

pub use engine::{EngineConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete patchbay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PatchbayConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PatchbayConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./patchbay.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PatchbayConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# patchbay configuration\n\n");

        output.push_str("[engine]\n");
        output.push_str(&format!(
            "default_channel_count = {}\n",
            self.engine.default_channel_count
        ));
        output.push_str(&format!(
            "sync_timeout_ms = {}\n",
            self.engine.sync_timeout_ms
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PatchbayConfig::default();
        assert_eq!(config.engine.default_channel_count, 2);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_to_toml_round_trips_through_serde() {
        let mut config = PatchbayConfig::default();
        config.engine.default_channel_count = 4;
        let rendered = config.to_toml();
        assert!(rendered.contains("[engine]"));
        assert!(rendered.contains("[telemetry]"));

        let parsed: PatchbayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchbay.toml");
        std::fs::write(&path, "[engine]\nsync_timeout_ms = 250\n").unwrap();

        let (config, sources) = PatchbayConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.engine.sync_timeout_ms, 250);
        assert!(sources.files.contains(&path));
    }
}
