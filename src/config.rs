//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$SMSDEDUP_CONFIG` (environment variable)
//! 2. `~/.config/smsdedup/config.toml` (Linux/macOS)
//!    `%APPDATA%\smsdedup\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override whatever the file says. Once a run starts the
//! configuration is read-only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Duplicate-matching knobs.
    pub matching: MatchConfig,
    /// Removal log rendering.
    pub log: LogConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override directory for the diagnostic log file.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Settings that decide whether two messages are the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Country code assumed for phone numbers that carry none.
    pub default_country_code: String,
    /// Treat timestamps within the same second as equal.
    pub ignore_date_milliseconds: bool,
    /// Treat texts differing only in whitespace as equal.
    pub ignore_whitespace_differences: bool,
    /// Compare only timestamp and body/text/data, across message kinds.
    pub aggressive: bool,
}

/// Removal log rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Field values at least this many characters long are replaced by a
    /// length placeholder in the removal log.
    pub field_length_limit: usize,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Read buffer size in bytes (default: 1048576 = 1 MB).
    pub read_buffer_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            default_country_code: "+1".to_string(),
            ignore_date_milliseconds: false,
            ignore_whitespace_differences: false,
            aggressive: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            field_length_limit: 1000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024 * 1024, // 1 MB
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to `path`, creating parent directories as needed.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DedupError::io(parent, e))?;
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| DedupError::Config(e.to_string()))?;
    std::fs::write(path, contents).map_err(|e| DedupError::io(path, e))?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("SMSDEDUP_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("smsdedup").join("config.toml"))
}

/// Return the directory for the diagnostic log file.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("smsdedup")
}

/// Output path used when none is given: `backup.xml` → `backup_deduplicated.xml`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_deduplicated.{}", ext.to_string_lossy()),
        None => format!("{stem}_deduplicated"),
    };
    input.with_file_name(name)
}

/// Removal log path used when none is given: `backup.xml` → `backup_deduplication.log`.
pub fn default_log_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}_deduplication.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.matching.default_country_code, "+1");
        assert!(!cfg.matching.ignore_date_milliseconds);
        assert!(!cfg.matching.ignore_whitespace_differences);
        assert!(!cfg.matching.aggressive);
        assert_eq!(cfg.log.field_length_limit, 1000);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.matching.aggressive = true;
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.matching, cfg.matching);
        assert_eq!(
            parsed.performance.read_buffer_size,
            cfg.performance.read_buffer_size
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[matching]
default_country_code = "+44"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.matching.default_country_code, "+44");
        assert!(!cfg.matching.aggressive);
        assert_eq!(cfg.log.field_length_limit, 1000);
    }

    #[test]
    fn test_save_config_writes_loadable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        save_config(&Config::default(), &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&contents).unwrap();
        assert_eq!(parsed.matching, MatchConfig::default());
    }

    #[test]
    fn test_default_paths() {
        let input = Path::new("/backups/sms-2024.xml");
        assert_eq!(
            default_output_path(input),
            PathBuf::from("/backups/sms-2024_deduplicated.xml")
        );
        assert_eq!(
            default_log_path(input),
            PathBuf::from("/backups/sms-2024_deduplication.log")
        );
        assert_eq!(
            default_output_path(Path::new("plain")),
            PathBuf::from("plain_deduplicated")
        );
    }
}
