//! Operator-visible aggregator statistics and the query client

use crate::error::{BatcherError, Result};
use crate::state::AggregatorState;
use proven_common::subjects;
use proven_engine::{Message, MockClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Read-only snapshot answered by the stats query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherStats {
    /// Requests waiting for the next cut
    pub pending_writes: usize,

    /// Batches cut and answered over the aggregator's lifetime
    pub processed_batches: u64,

    /// Accepted submits handled by the current instance
    pub total_signals_received: u64,

    /// Continue-as-new count
    pub restarts: u64,

    /// Duplicate submits absorbed over the aggregator's lifetime
    pub duplicates_absorbed: u64,

    /// Accepted submits after which the instance relaunches
    pub checkpoint_signal_threshold: u64,
}

impl BatcherStats {
    pub fn from_state(state: &AggregatorState, checkpoint_signal_threshold: u64) -> Self {
        Self {
            pending_writes: state.pending.len(),
            processed_batches: state.batches_completed,
            total_signals_received: state.signals_received_since_restart,
            restarts: state.restarts,
            duplicates_absorbed: state.duplicates_absorbed,
            checkpoint_signal_threshold,
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::with_body(serde_json::to_vec(self)?))
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(serde_json::from_slice(&message.body)?)
    }
}

/// Queries the stats of one aggregator through the engine
#[derive(Clone)]
pub struct StatsClient {
    client: Arc<MockClient>,
    aggregator_id: String,
    timeout: Duration,
}

impl StatsClient {
    pub fn new(client: Arc<MockClient>, aggregator_id: impl Into<String>) -> Self {
        Self {
            client,
            aggregator_id: aggregator_id.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn aggregator_id(&self) -> &str {
        &self.aggregator_id
    }

    /// Ask the running aggregator instance for its current stats
    pub async fn get_stats(&self) -> Result<BatcherStats> {
        let subject = subjects::stats_subject(&self.aggregator_id);
        let reply = self
            .client
            .query(&subject, Message::default(), self.timeout)
            .await
            .map_err(BatcherError::Engine)?;

        BatcherStats::from_message(&reply)
    }
}
