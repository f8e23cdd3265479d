//! Aggregator configuration

use crate::error::{BatcherError, Result};
use proven_engine::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Pending requests that force an immediate batch cut
    pub batch_size_threshold: usize,

    /// Longest a non-empty pending set waits before being cut
    pub batch_time_threshold: Duration,

    /// Accepted signals after which the instance checkpoints and relaunches
    pub checkpoint_signal_threshold: u64,

    /// Capacity of the processed-request dedup window.
    ///
    /// Must exceed the number of requests that can still be in flight at a
    /// checkpoint boundary; an id evicted from the window is treated as new
    /// if it is ever submitted again.
    pub dedup_window_size: usize,

    /// Retry policy for the batch writer call
    pub writer_retry: RetryPolicy,

    /// Start-to-close timeout of a single writer attempt
    pub writer_timeout: Duration,

    /// Checkpoints kept per aggregator after a successful save
    pub checkpoints_retained: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size_threshold: 100,
            batch_time_threshold: Duration::from_secs(20),
            checkpoint_signal_threshold: 1000,
            dedup_window_size: 500,
            writer_retry: RetryPolicy::default(),
            writer_timeout: Duration::from_secs(30),
            checkpoints_retained: 2,
        }
    }
}

impl BatcherConfig {
    pub fn with_batch_size_threshold(mut self, threshold: usize) -> Self {
        self.batch_size_threshold = threshold;
        self
    }

    pub fn with_batch_time_threshold(mut self, threshold: Duration) -> Self {
        self.batch_time_threshold = threshold;
        self
    }

    pub fn with_checkpoint_signal_threshold(mut self, threshold: u64) -> Self {
        self.checkpoint_signal_threshold = threshold;
        self
    }

    pub fn with_dedup_window_size(mut self, size: usize) -> Self {
        self.dedup_window_size = size;
        self
    }

    pub fn with_writer_retry(mut self, policy: RetryPolicy) -> Self {
        self.writer_retry = policy;
        self
    }

    pub fn with_writer_timeout(mut self, timeout: Duration) -> Self {
        self.writer_timeout = timeout;
        self
    }

    /// Reject settings the aggregator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size_threshold == 0 {
            return Err(BatcherError::InvalidConfig(
                "batch_size_threshold must be at least 1".into(),
            ));
        }
        if self.batch_time_threshold.is_zero() {
            return Err(BatcherError::InvalidConfig(
                "batch_time_threshold must be non-zero".into(),
            ));
        }
        if self.checkpoint_signal_threshold == 0 {
            return Err(BatcherError::InvalidConfig(
                "checkpoint_signal_threshold must be at least 1".into(),
            ));
        }
        if self.dedup_window_size == 0 {
            return Err(BatcherError::InvalidConfig(
                "dedup_window_size must be at least 1".into(),
            ));
        }
        if self.writer_timeout.is_zero() {
            return Err(BatcherError::InvalidConfig(
                "writer_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatcherConfig::default();
        assert_eq!(config.batch_size_threshold, 100);
        assert_eq!(config.batch_time_threshold, Duration::from_secs(20));
        assert_eq!(config.checkpoint_signal_threshold, 1000);
        assert_eq!(config.dedup_window_size, 500);
        assert_eq!(config.writer_retry.maximum_attempts, 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        assert!(
            BatcherConfig::default()
                .with_batch_size_threshold(0)
                .validate()
                .is_err()
        );
        assert!(
            BatcherConfig::default()
                .with_dedup_window_size(0)
                .validate()
                .is_err()
        );
        assert!(
            BatcherConfig::default()
                .with_batch_time_threshold(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BatcherConfig =
            serde_json::from_str(r#"{ "batch_size_threshold": 10 }"#).unwrap();
        assert_eq!(config.batch_size_threshold, 10);
        assert_eq!(config.dedup_window_size, 500);
    }
}
