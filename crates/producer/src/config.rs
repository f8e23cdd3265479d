//! Producer configuration

use proven_engine::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a producer workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// How long to wait for the aggregator's confirmation after submitting
    pub confirmation_timeout: Duration,

    /// Retry policy for delivering the submit to the aggregator's inbox
    pub submit_retry: RetryPolicy,

    /// Retry policy for the preparation and finalization steps
    pub step_retry: RetryPolicy,

    /// Start-to-close timeout of a single step attempt
    pub step_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            submit_retry: RetryPolicy::default(),
            step_retry: RetryPolicy::default(),
            step_timeout: Duration::from_secs(10),
        }
    }
}

impl ProducerConfig {
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_submit_retry(mut self, policy: RetryPolicy) -> Self {
        self.submit_retry = policy;
        self
    }

    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}
