use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding config and the job database
pub const PROJECT_DIR: &str = ".printfix";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid {name}: 0. Timeouts must be positive")]
    InvalidTimeout { name: &'static str },

    #[error("Invalid requests_per_second: {0}. Must be at least 1")]
    InvalidRateLimit(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid auto_approve_threshold: {0}. Must be between 0 and 100")]
    InvalidThreshold(f64),

    #[error("Invalid {name} weight: {value}. Must be zero or positive")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("Invalid max_upload_size_mb: 0. Must be positive")]
    InvalidUploadLimit,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .printfix/config.yaml (project config, created by init)
    /// 3. .printfix/local.yaml (project local overrides, optional)
    /// 4. Environment variables (PRINTFIX_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{PROJECT_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{PROJECT_DIR}/local.yaml")))
            .merge(Env::prefixed("PRINTFIX_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, environment still applied on top
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("PRINTFIX_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        if config.worker.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.worker.concurrency));
        }
        if config.worker.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.worker.poll_interval_ms));
        }

        let timeouts = [
            ("diagnosis_timeout_secs", config.providers.diagnosis_timeout_secs),
            ("tool_timeout_secs", config.providers.tool_timeout_secs),
            ("render_timeout_secs", config.providers.render_timeout_secs),
            ("rationale_timeout_secs", config.providers.rationale_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::InvalidTimeout { name });
        }

        if config.rate_limit.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(config.rate_limit.requests_per_second));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let threshold = config.gating.auto_approve_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        let weights = &config.gating.weights;
        for (name, value) in [
            ("critical", weights.critical),
            ("warning", weights.warning),
            ("info", weights.info),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }

        if config.ingestion.max_upload_size_mb == 0 {
            return Err(ConfigError::InvalidUploadLimit);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Severity;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".printfix/printfix.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.worker.concurrency, 2);
        assert!((config.gating.auto_approve_threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.planner.severity_floor, Severity::Warning);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /var/lib/printfix/jobs.db
worker:
  concurrency: 8
gating:
  auto_approve_threshold: 85
  weights:
    critical: 40
planner:
  severity_floor: critical
  explain_decisions: true
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/var/lib/printfix/jobs.db");
        assert_eq!(config.worker.concurrency, 8);
        assert!((config.gating.auto_approve_threshold - 85.0).abs() < f64::EPSILON);
        assert!((config.gating.weights.critical - 40.0).abs() < f64::EPSILON);
        assert!((config.gating.weights.warning - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.planner.severity_floor, Severity::Critical);
        assert!(config.planner.explain_decisions);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "worker:\n  concurrency: 4\nrate_limit:\n  burst_size: 3").unwrap();

        let config = temp_env::with_var("PRINTFIX_WORKER__CONCURRENCY", Some("6"), || {
            ConfigLoader::load_from_file(file.path())
        })
        .unwrap();

        assert_eq!(config.worker.concurrency, 6);
        assert_eq!(config.rate_limit.burst_size, 3);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "gating:\n  auto_approve_threshold: 140").unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("auto_approve_threshold"));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(ref f)) if f == "xml"
        ));
    }

    #[test]
    fn test_validate_invalid_rotation() {
        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogRotation(_))
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.worker.concurrency = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.providers.render_timeout_secs = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTimeout { name: "render_timeout_secs" })
        ));
    }

    #[test]
    fn test_validate_zero_burst_size() {
        let mut config = Config::default();
        config.rate_limit.burst_size = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBurstSize(0))
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30000, 10000))
        ));
    }

    #[test]
    fn test_validate_threshold_bounds() {
        let mut config = Config::default();
        config.gating.auto_approve_threshold = 100.0;
        assert!(ConfigLoader::validate(&config).is_ok());

        config.gating.auto_approve_threshold = -1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_validate_negative_weight() {
        let mut config = Config::default();
        config.gating.weights.info = -2.0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWeight { name: "info", .. })
        ));
    }
}
