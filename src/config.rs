//! Configuration for the session context core
//!
//! Every section deserializes with per-field defaults, so a partial TOML file
//! or a handful of `SESSION_CONTEXT__<SECTION>__<KEY>` variables is enough.

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `SESSION_CONTEXT__COMPACTION__THRESHOLD_FRACTION`
pub const ENV_PREFIX: &str = "SESSION_CONTEXT";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub overflow: OverflowConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// A `.env` file in the working directory is read first when present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        let c = &self.compaction;
        check_fraction("compaction.threshold_fraction", c.threshold_fraction)?;
        check_fraction("compaction.preserve_fraction", c.preserve_fraction)?;
        check_fraction("compaction.fit_safety_margin", c.fit_safety_margin)?;
        check_fraction("compaction.min_preserve_fraction", c.min_preserve_fraction)?;
        check_fraction("compaction.max_preserve_fraction", c.max_preserve_fraction)?;
        if c.min_preserve_fraction > c.max_preserve_fraction {
            return Err(ContextError::Configuration(format!(
                "compaction.min_preserve_fraction ({}) exceeds max_preserve_fraction ({})",
                c.min_preserve_fraction, c.max_preserve_fraction
            )));
        }

        let o = &self.overflow;
        if o.max_response_size == 0 {
            return Err(ContextError::Configuration(
                "overflow.max_response_size must be positive".to_string(),
            ));
        }
        if o.critical_remaining_percent > o.low_remaining_percent {
            return Err(ContextError::Configuration(format!(
                "overflow.critical_remaining_percent ({}) exceeds low_remaining_percent ({})",
                o.critical_remaining_percent, o.low_remaining_percent
            )));
        }

        if self.session.model.trim().is_empty() {
            return Err(ContextError::Configuration("session.model must not be empty".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ContextError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ContextError::Configuration(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Chat session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model used until the session switches
    #[serde(default = "default_model")]
    pub model: String,

    /// Persist running token statistics to the session store
    #[serde(default = "default_persist_token_stats")]
    pub persist_token_stats: bool,
}

fn default_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_persist_token_stats() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            persist_token_stats: default_persist_token_stats(),
        }
    }
}

/// Compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Fraction of the context window that triggers compaction
    #[serde(default = "default_threshold_fraction")]
    pub threshold_fraction: f64,

    /// Fraction of conversation bytes kept verbatim after compaction
    #[serde(default = "default_preserve_fraction")]
    pub preserve_fraction: f64,

    /// Leading turns never compacted
    #[serde(default = "default_environment_turns")]
    pub environment_turns: usize,

    /// Conversation turns (after the environment prefix) needed to compact
    #[serde(default = "default_min_conversation_turns")]
    pub min_conversation_turns: usize,

    /// Share of a target window usable when switching models
    #[serde(default = "default_fit_safety_margin")]
    pub fit_safety_margin: f64,

    /// Tokens reserved for system instruction and tools when fitting
    #[serde(default = "default_overhead_estimate")]
    pub overhead_estimate_tokens: usize,

    #[serde(default = "default_min_preserve_fraction")]
    pub min_preserve_fraction: f64,

    #[serde(default = "default_max_preserve_fraction")]
    pub max_preserve_fraction: f64,

    /// Temperature for the summarization call
    #[serde(default)]
    pub summarization_temperature: f32,
}

fn default_threshold_fraction() -> f64 {
    0.8
}

fn default_preserve_fraction() -> f64 {
    0.3
}

fn default_environment_turns() -> usize {
    2
}

fn default_min_conversation_turns() -> usize {
    2
}

fn default_fit_safety_margin() -> f64 {
    0.9
}

fn default_overhead_estimate() -> usize {
    8000
}

fn default_min_preserve_fraction() -> f64 {
    0.05
}

fn default_max_preserve_fraction() -> f64 {
    0.3
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_fraction: default_threshold_fraction(),
            preserve_fraction: default_preserve_fraction(),
            environment_turns: default_environment_turns(),
            min_conversation_turns: default_min_conversation_turns(),
            fit_safety_margin: default_fit_safety_margin(),
            overhead_estimate_tokens: default_overhead_estimate(),
            min_preserve_fraction: default_min_preserve_fraction(),
            max_preserve_fraction: default_max_preserve_fraction(),
            summarization_temperature: 0.0,
        }
    }
}

/// Local token estimator used when the endpoint counter is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalEstimator {
    #[default]
    Heuristic,
    Tiktoken,
}

/// Overflow guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowConfig {
    /// Largest tool result (bytes) kept inline
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    /// Lifetime of a stored artifact in seconds
    #[serde(default = "default_artifact_ttl")]
    pub artifact_ttl_secs: u64,

    /// Interval of the expiry sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Below this remaining percentage every overflow goes to a file
    #[serde(default = "default_critical_percent")]
    pub critical_remaining_percent: f64,

    /// Below this remaining percentage truncation budgets tighten
    #[serde(default = "default_low_percent")]
    pub low_remaining_percent: f64,

    /// Artifact directory; resolved through the fallback chain when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    #[serde(default)]
    pub local_estimator: LocalEstimator,
}

fn default_max_response_size() -> usize {
    100_000
}

fn default_artifact_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_critical_percent() -> f64 {
    10.0
}

fn default_low_percent() -> f64 {
    20.0
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            max_response_size: default_max_response_size(),
            artifact_ttl_secs: default_artifact_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            critical_remaining_percent: default_critical_percent(),
            low_remaining_percent: default_low_percent(),
            temp_dir: None,
            local_estimator: LocalEstimator::default(),
        }
    }
}

impl OverflowConfig {
    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Retry configuration for endpoint calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
