use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::analysis::{AnalysisKind, ConfidenceBand, UrgencyLevel};

/// Main configuration structure for the orchestration core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Quiet period before debounced input is analyzed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Input shorter than this (trimmed, in characters) is never analyzed
    #[serde(default = "default_min_input_length")]
    pub min_input_length: usize,

    /// Number of past aggregates kept per subject
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Analysis kinds dispatched on every trigger
    #[serde(default = "default_kinds")]
    pub kinds: Vec<AnalysisKind>,

    /// Evict sessions idle for longer than this; `None` keeps them forever
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Released subjects whose history is kept; least recently used go first
    #[serde(default = "default_cached_subjects")]
    pub cached_subjects: usize,

    /// Rate-limit retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Confidence banding
    #[serde(default)]
    pub confidence_thresholds: ConfidenceThresholds,

    /// Urgency banding
    #[serde(default)]
    pub urgency_thresholds: UrgencyThresholds,

    /// Backend connection settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_debounce_ms() -> u64 {
    1000
}

const fn default_min_input_length() -> usize {
    10
}

const fn default_history_size() -> usize {
    20
}

const fn default_cached_subjects() -> usize {
    512
}

fn default_kinds() -> Vec<AnalysisKind> {
    AnalysisKind::ALL.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            min_input_length: default_min_input_length(),
            history_size: default_history_size(),
            kinds: default_kinds(),
            idle_timeout_secs: None,
            cached_subjects: default_cached_subjects(),
            retry: RetryConfig::default(),
            confidence_thresholds: ConfidenceThresholds::default(),
            urgency_thresholds: UrgencyThresholds::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Retry policy configuration for rate-limited responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after every rate-limited attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for a single backoff wait in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Cut-offs used to band the overall confidence of an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfidenceThresholds {
    /// Below this the result is reported as inconclusive
    #[serde(default = "default_inconclusive_below")]
    pub inconclusive_below: f64,

    /// At or above this the result is reported as high confidence
    #[serde(default = "default_high_at")]
    pub high_at: f64,
}

const fn default_inconclusive_below() -> f64 {
    0.3
}

const fn default_high_at() -> f64 {
    0.8
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            inconclusive_below: default_inconclusive_below(),
            high_at: default_high_at(),
        }
    }
}

impl ConfidenceThresholds {
    pub fn band(&self, confidence: f64) -> ConfidenceBand {
        if confidence < self.inconclusive_below {
            ConfidenceBand::Inconclusive
        } else if confidence >= self.high_at {
            ConfidenceBand::High
        } else {
            ConfidenceBand::Moderate
        }
    }
}

/// Lower bounds of the medium, high and critical urgency levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UrgencyThresholds {
    #[serde(default = "default_medium")]
    pub medium: f64,

    #[serde(default = "default_high")]
    pub high: f64,

    #[serde(default = "default_critical")]
    pub critical: f64,
}

const fn default_medium() -> f64 {
    0.4
}

const fn default_high() -> f64 {
    0.6
}

const fn default_critical() -> f64 {
    0.8
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
            critical: default_critical(),
        }
    }
}

impl UrgencyThresholds {
    /// Map an urgency score in [0, 1] to its level.
    pub fn level(&self, score: f64) -> UrgencyLevel {
        if score >= self.critical {
            UrgencyLevel::Critical
        } else if score >= self.high {
            UrgencyLevel::High
        } else if score >= self.medium {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        }
    }

    /// Lowest score that still maps to `level`.
    pub fn floor(&self, level: UrgencyLevel) -> f64 {
        match level {
            UrgencyLevel::Critical => self.critical,
            UrgencyLevel::High => self.high,
            UrgencyLevel::Medium => self.medium,
            UrgencyLevel::Low => 0.0,
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Base URL of the analysis API, e.g. `http://localhost:8000/api/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extra headers sent with every request (auth tokens and the like)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-request timeout in seconds; streams are not subject to it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

const fn default_timeout_secs() -> u64 {
    60
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
