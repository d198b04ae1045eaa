//! Configuration loading for portal-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and field is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for portal-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Liveness configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Capacity limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Eviction sweep task configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Liveness configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Silence after which a site is declared dead, in milliseconds (default: 30000).
    #[serde(default = "default_eviction_period_ms")]
    pub eviction_period_ms: u64,
}

/// Capacity limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of open portals (default: 1024).
    #[serde(default = "default_max_portals")]
    pub max_portals: usize,
    /// Maximum sites in one portal, host included (default: 32).
    #[serde(default = "default_max_sites_per_portal")]
    pub max_sites_per_portal: usize,
}

/// Eviction sweep task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Sweep interval in milliseconds (default: 1000).
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
    /// Enable the sweep task (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_eviction_period_ms() -> u64 {
    30_000
}

fn default_max_portals() -> usize {
    1024
}

fn default_max_sites_per_portal() -> usize {
    32
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_sweep_enabled() -> bool {
    true
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            eviction_period_ms: default_eviction_period_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_portals: default_max_portals(),
            max_sites_per_portal: default_max_sites_per_portal(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            enabled: default_sweep_enabled(),
        }
    }
}

impl HeartbeatConfig {
    /// The eviction period as a duration.
    pub fn eviction_period(&self) -> Duration {
        Duration::from_millis(self.eviction_period_ms)
    }
}

impl SweepConfig {
    /// The sweep interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.eviction_period_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "heartbeat.eviction_period_ms must be positive".into(),
            });
        }
        if self.limits.max_portals == 0 {
            return Err(ConfigError::Invalid {
                reason: "limits.max_portals must be positive".into(),
            });
        }
        if self.limits.max_sites_per_portal < 2 {
            return Err(ConfigError::Invalid {
                reason: "limits.max_sites_per_portal must admit a host and a guest".into(),
            });
        }
        if self.sweep.enabled && self.sweep.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "sweep.interval_ms must be positive when the sweep is enabled".into(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Values are inconsistent.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.heartbeat.eviction_period_ms, 30_000);
        assert_eq!(config.limits.max_sites_per_portal, 32);
        assert!(config.sweep.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[heartbeat]
eviction_period_ms = 500

[limits]
max_portals = 4
max_sites_per_portal = 3

[sweep]
interval_ms = 100
enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.heartbeat.eviction_period(), Duration::from_millis(500));
        assert_eq!(config.limits.max_portals, 4);
        assert_eq!(config.limits.max_sites_per_portal, 3);
        assert_eq!(config.sweep.interval(), Duration::from_millis(100));
        assert!(!config.sweep.enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.heartbeat.eviction_period_ms, 30_000);
        assert_eq!(config.sweep.interval_ms, 1_000);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let toml = r#"
[heartbeat]
[limits]
max_portals = 8
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.max_portals, 8);
        assert_eq!(config.limits.max_sites_per_portal, 32);
    }

    #[test]
    fn zero_eviction_period_is_rejected() {
        let mut config = Config::default();
        config.heartbeat.eviction_period_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn single_site_portals_are_rejected() {
        let mut config = Config::default();
        config.limits.max_sites_per_portal = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[heartbeat]\neviction_period_ms = 2000").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.heartbeat.eviction_period_ms, 2000);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[heartbeat\nnope").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
