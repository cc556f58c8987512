use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory, relative to the working directory, holding the config files
pub const CONFIG_DIR: &str = ".clinical";

/// Prefix of environment variable overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "CLINICAL_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid min_input_length: {0}. Must be at least 1")]
    InvalidMinInputLength(usize),

    #[error("No analysis kinds configured")]
    NoKinds,

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid backoff_factor: {0}. Must be at least 1.0")]
    InvalidBackoffFactor(f64),

    #[error("Invalid backoff configuration: base_delay_ms ({0}) exceeds max_delay_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("Invalid threshold {name}: {value}. Must be within [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("Thresholds out of order: {0}")]
    ThresholdOrder(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Transport base_url cannot be empty")]
    EmptyBaseUrl,

    #[error("Invalid timeout_secs: {0}. Must be at least 1")]
    InvalidTimeout(u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .clinical/config.yaml
    /// 3. .clinical/local.yaml (optional local overrides)
    /// 4. Environment variables (CLINICAL_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with the config directory resolved
    /// against `root` instead of the working directory.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.min_input_length == 0 {
            return Err(ConfigError::InvalidMinInputLength(config.min_input_length));
        }

        if config.kinds.is_empty() {
            return Err(ConfigError::NoKinds);
        }

        // Retry policy
        let retry = &config.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(retry.max_attempts));
        }
        if retry.backoff_factor < 1.0 || !retry.backoff_factor.is_finite() {
            return Err(ConfigError::InvalidBackoffFactor(retry.backoff_factor));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                retry.base_delay_ms,
                retry.max_delay_ms,
            ));
        }

        // Thresholds
        let confidence = &config.confidence_thresholds;
        let urgency = &config.urgency_thresholds;
        for (name, value) in [
            ("confidence_thresholds.inconclusive_below", confidence.inconclusive_below),
            ("confidence_thresholds.high_at", confidence.high_at),
            ("urgency_thresholds.medium", urgency.medium),
            ("urgency_thresholds.high", urgency.high),
            ("urgency_thresholds.critical", urgency.critical),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if confidence.inconclusive_below > confidence.high_at {
            return Err(ConfigError::ThresholdOrder(format!(
                "confidence inconclusive_below ({}) > high_at ({})",
                confidence.inconclusive_below, confidence.high_at
            )));
        }
        if urgency.medium > urgency.high || urgency.high > urgency.critical {
            return Err(ConfigError::ThresholdOrder(format!(
                "urgency medium ({}) <= high ({}) <= critical ({}) violated",
                urgency.medium, urgency.high, urgency.critical
            )));
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        // Transport
        if config.transport.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if config.transport.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(config.transport.timeout_secs));
        }

        Ok(())
    }
}
