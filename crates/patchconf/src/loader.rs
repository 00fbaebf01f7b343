//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PatchbayConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Which files and environment variables produced a config.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files read, earliest first
    pub files: Vec<PathBuf>,
    /// `PATCHBAY_*` (and `RUST_LOG`) variables that were applied
    pub env_overrides: Vec<String>,
}

/// Existing config files, system first, then user, then `./patchbay.toml`.
/// Later files override earlier ones.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], with `override_path` standing in for
/// `./patchbay.toml` when it exists.
pub fn discover_config_files_with_override(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/patchbay/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("patchbay/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = override_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("patchbay.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay the keys it sets onto `config`.
pub fn overlay_file(config: &mut PatchbayConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

/// Overlay the keys present in a TOML document. Absent keys keep their
/// current value, so later files only override what they mention.
fn overlay_toml(config: &mut PatchbayConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(engine) = table.get("engine").and_then(|v| v.as_table()) {
        if let Some(v) = engine.get("default_channel_count") {
            let count = v.as_integer().filter(|n| *n > 0).ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("engine.default_channel_count must be a positive integer, got {}", v),
            })?;
            config.engine.default_channel_count = count as usize;
        }
        if let Some(v) = engine.get("sync_timeout_ms") {
            let timeout = v.as_integer().filter(|n| *n >= 0).ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("engine.sync_timeout_ms must be a non-negative integer, got {}", v),
            })?;
            config.engine.sync_timeout_ms = timeout as u64;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

/// Overlay `PATCHBAY_*` variables onto `config`.
pub fn apply_env_overrides(config: &mut PatchbayConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("PATCHBAY_DEFAULT_CHANNEL_COUNT") {
        if let Ok(count) = v.parse::<usize>() {
            if count > 0 {
                config.engine.default_channel_count = count;
                sources.env_overrides.push("PATCHBAY_DEFAULT_CHANNEL_COUNT".to_string());
            }
        }
    }
    if let Ok(v) = env::var("PATCHBAY_SYNC_TIMEOUT_MS") {
        if let Ok(timeout) = v.parse() {
            config.engine.sync_timeout_ms = timeout;
            sources.env_overrides.push("PATCHBAY_SYNC_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("PATCHBAY_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("PATCHBAY_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over PATCHBAY_LOG_LEVEL.
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_files() {
        // Depends on the host, only checks it runs.
        let _files = discover_config_files();
    }

    #[test]
    fn test_overlay_keeps_unmentioned_keys() {
        let mut config = PatchbayConfig::default();
        config.engine.sync_timeout_ms = 42;

        overlay_toml(&mut config, "[engine]\ndefault_channel_count = 6\n", Path::new("a.toml"))
            .unwrap();

        assert_eq!(config.engine.default_channel_count, 6);
        assert_eq!(config.engine.sync_timeout_ms, 42);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_later_file_wins() {
        let mut config = PatchbayConfig::default();
        overlay_toml(&mut config, "[telemetry]\nlog_level = \"debug\"\n", Path::new("a.toml"))
            .unwrap();
        overlay_toml(&mut config, "[telemetry]\nlog_level = \"warn\"\n", Path::new("b.toml"))
            .unwrap();
        assert_eq!(config.telemetry.log_level, "warn");
    }

    #[test]
    fn test_rejects_zero_channel_count() {
        let mut config = PatchbayConfig::default();
        let err = overlay_toml(&mut config, "[engine]\ndefault_channel_count = 0\n", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(config.engine.default_channel_count, 2);
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let mut config = PatchbayConfig::default();
        let err = overlay_toml(&mut config, "[engine\n", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let mut config = PatchbayConfig::default();
        let err = overlay_file(&mut config, Path::new("/nonexistent/patchbay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
