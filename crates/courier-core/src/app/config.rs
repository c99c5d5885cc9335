//! Delivery configuration.
//!
//! Every field has a default, so a config file only names what it changes.
//! Durations are plain milliseconds on the wire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerPolicy;
use crate::dedup::DedupConfig;
use crate::queue::QueueConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub max_auth_refreshes: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: 0.1,
            max_auth_refreshes: 1,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            max_auth_refreshes: self.max_auth_refreshes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub window_size: usize,
    pub window_span_ms: u64,
    pub min_samples: usize,
    pub failure_ratio: f64,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            window_span_ms: 60_000,
            min_samples: 5,
            failure_ratio: 0.5,
            cooldown_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            window_size: self.window_size,
            window_span: Duration::from_millis(self.window_span_ms),
            min_samples: self.min_samples,
            failure_ratio: self.failure_ratio,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

/// Top-level settings for one orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    /// Per-attempt transport timeout.
    pub request_timeout_ms: u64,
    /// Used when `SubmitOptions::max_attempts` is unset.
    pub default_max_attempts: u32,
    pub dedup_window_ms: u64,
    pub merge_partial_overlaps: bool,
    /// Snapshot entries older than this are dropped at startup.
    pub staleness_ms: u64,
    pub history_limit: usize,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 100,
            request_timeout_ms: 10_000,
            default_max_attempts: 3,
            dedup_window_ms: 5000,
            merge_partial_overlaps: false,
            staleness_ms: 60 * 60 * 1000,
            history_limit: 200,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl DeliveryConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be positive");
        }
        if self.default_max_attempts == 0 {
            return invalid("default_max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms exceeds retry.max_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return invalid("retry.jitter must be within 0.0..=1.0");
        }
        if self.breaker.window_size == 0 || self.breaker.min_samples == 0 {
            return invalid("breaker.window_size and breaker.min_samples must be at least 1");
        }
        if !(self.breaker.failure_ratio > 0.0 && self.breaker.failure_ratio <= 1.0) {
            return invalid("breaker.failure_ratio must be within (0.0, 1.0]");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            max_queue_size: self.max_queue_size,
            staleness: Duration::from_millis(self.staleness_ms),
            history_limit: self.history_limit,
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            window: Duration::from_millis(self.dedup_window_ms),
            merge_partial_overlaps: self.merge_partial_overlaps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = DeliveryConfig::default();
        assert_eq!(c.max_concurrent, 5);
        assert_eq!(c.max_queue_size, 100);
        assert_eq!(c.request_timeout(), Duration::from_secs(10));
        assert_eq!(c.dedup_config().window, Duration::from_millis(5000));
        assert_eq!(c.queue_config().staleness, Duration::from_secs(3600));
        assert_eq!(c.retry.policy(), RetryPolicy::default());
        assert_eq!(c.breaker.policy(), BreakerPolicy::default());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let c = DeliveryConfig::from_json_str(
            r#"{"max_concurrent": 2, "retry": {"base_delay_ms": 250}}"#,
        )
        .unwrap();
        assert_eq!(c.max_concurrent, 2);
        assert_eq!(c.retry.base_delay_ms, 250);
        assert_eq!(c.retry.max_delay_ms, 30_000);
        assert_eq!(c.max_queue_size, 100);
    }

    #[rstest]
    #[case(r#"{"max_concurrent": 0}"#)]
    #[case(r#"{"request_timeout_ms": 0}"#)]
    #[case(r#"{"retry": {"jitter": 1.5}}"#)]
    #[case(r#"{"retry": {"base_delay_ms": 60000}}"#)]
    #[case(r#"{"breaker": {"failure_ratio": 0.0}}"#)]
    fn rejects_unusable_values(#[case] json: &str) {
        assert!(matches!(
            DeliveryConfig::from_json_str(json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dedup_window_ms": 1000, "merge_partial_overlaps": true}}"#).unwrap();
        let c = DeliveryConfig::from_json_file(file.path()).unwrap();
        assert_eq!(c.dedup_config().window, Duration::from_secs(1));
        assert!(c.merge_partial_overlaps);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = DeliveryConfig::from_json_file("/nonexistent/courier.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
