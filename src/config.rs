//! TOML configuration for the sensorwatch process.
//!
//! Values are read once at startup and handed to the engine as an immutable
//! [`EngineConfig`]. Lookup order: explicit path, `SENSORWATCH_CONFIG`,
//! `/etc/sensorwatch/sensorwatch.toml`, compiled-in defaults.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::{EngineConfig, RecencyWindow};

pub const CONFIG_ENV: &str = "SENSORWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sensorwatch/sensorwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub recency: RecencyWindow,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try the environment override, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{CONFIG_ENV} set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        let hours = self.liveness.fallback_hours;
        if !hours.is_finite() || hours <= 0.0 {
            bail!("liveness.fallback_hours must be a positive number, got {hours}");
        }
        if self.recency.magnitude() == 0 {
            bail!("recency window must be at least 1 ({})", self.recency);
        }
        if self.runner.workers == 0 {
            bail!("runner.workers must be at least 1");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            recency: self.recency,
            fallback_hours: self.liveness.fallback_hours,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Threshold in hours for sensors whose reporting interval cannot be inferred.
    pub fallback_hours: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            fallback_hours: 24.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Devices evaluated concurrently in batch mode.
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.liveness.fallback_hours, 24.0);
        assert_eq!(cfg.recency, RecencyWindow::Days(5));
        assert_eq!(cfg.runner.workers, 4);
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let cfg = MonitorConfig::from_toml(
            r#"
            [recency]
            hours = 12

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.recency, RecencyWindow::Hours(12));
        assert_eq!(cfg.liveness.fallback_hours, 24.0);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.level, "info");

        let engine = cfg.engine_config();
        assert_eq!(engine.recency, RecencyWindow::Hours(12));
        assert_eq!(engine.fallback_hours, 24.0);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(MonitorConfig::from_toml("[liveness]\nfallback_hours = 0.0\n").is_err());
        assert!(MonitorConfig::from_toml("[liveness]\nfallback_hours = -3.0\n").is_err());
        assert!(MonitorConfig::from_toml("[recency]\ndays = 0\n").is_err());
        assert!(MonitorConfig::from_toml("[runner]\nworkers = 0\n").is_err());
        assert!(MonitorConfig::from_toml("[recency]\nweeks = 2\n").is_err());
    }

    #[test]
    fn test_load_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[liveness]\nfallback_hours = 48.0\n[recency]\ndays = 2").unwrap();
        let cfg = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(cfg.liveness.fallback_hours, 48.0);

        let rendered = cfg.to_toml().unwrap();
        let again = MonitorConfig::from_toml(&rendered).unwrap();
        assert_eq!(again.recency, RecencyWindow::Days(2));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = MonitorConfig::load(Path::new("/nonexistent/sensorwatch.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
