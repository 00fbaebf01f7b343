//! Engine configuration - values the reconciler reads on every pass.

use serde::{Deserialize, Serialize};

/// Reconciliation engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Channel count used when no component in a parentage sets one.
    /// Default: 2
    #[serde(default = "EngineConfig::default_channel_count")]
    pub default_channel_count: usize,

    /// How long a context sync barrier may take before the pass fails.
    /// Default: 5000
    #[serde(default = "EngineConfig::default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl EngineConfig {
    fn default_channel_count() -> usize {
        2
    }

    fn default_sync_timeout_ms() -> u64 {
        5000
    }

    /// The sync timeout as a `Duration`.
    pub fn sync_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_channel_count: Self::default_channel_count(),
            sync_timeout_ms: Self::default_sync_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_channel_count, 2);
        assert_eq!(config.sync_timeout().as_millis(), 5000);
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: EngineConfig = toml::from_str("default_channel_count = 8").unwrap();
        assert_eq!(config.default_channel_count, 8);
        assert_eq!(config.sync_timeout_ms, 5000);
    }
}
