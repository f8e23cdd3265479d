//! Batch writer seam
//!
//! The writer performs the bulk write for one cut batch and reports an
//! outcome per request. A whole-call failure is a `WriterError`; the engine
//! retries those. Per-request rejections travel inside the `BatchResult`.

use async_trait::async_trait;
use proven_common::{RequestId, WriteOutcome, WriteRequest};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Failure of a whole writer invocation
#[derive(Debug, Clone, Error)]
pub enum WriterError {
    #[error("Transient writer failure: {0}")]
    Transient(String),

    #[error("Writer attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcomes of one writer invocation, keyed by request id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    outcomes: HashMap<RequestId, WriteOutcome>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request of `batch` succeeded
    pub fn all_success(batch: &[WriteRequest]) -> Self {
        Self {
            outcomes: batch
                .iter()
                .map(|r| (r.request_id.clone(), WriteOutcome::Success))
                .collect(),
        }
    }

    pub fn set(&mut self, request_id: RequestId, outcome: WriteOutcome) {
        self.outcomes.insert(request_id, outcome);
    }

    pub fn get(&self, request_id: &RequestId) -> Option<&WriteOutcome> {
        self.outcomes.get(request_id)
    }

    /// Remove and return the outcome for `request_id`
    pub fn take(&mut self, request_id: &RequestId) -> Option<WriteOutcome> {
        self.outcomes.remove(request_id)
    }

    /// Ids with outcomes still in this result
    pub fn request_ids(&self) -> impl Iterator<Item = &RequestId> {
        self.outcomes.keys()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Performs the bulk write of one batch
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Write `batch` (arrival order) and report an outcome per request
    async fn write_batch(&self, batch: &[WriteRequest]) -> Result<BatchResult, WriterError>;

    /// Name used in logs
    fn writer_name(&self) -> &str;
}

/// Writer that records each batch to the log as the ledger write
pub struct LoggingWriter {
    ledger: String,
}

impl LoggingWriter {
    pub fn new(ledger: impl Into<String>) -> Self {
        Self {
            ledger: ledger.into(),
        }
    }
}

impl Default for LoggingWriter {
    fn default() -> Self {
        Self::new("ledger")
    }
}

#[async_trait]
impl BatchWriter for LoggingWriter {
    async fn write_batch(&self, batch: &[WriteRequest]) -> Result<BatchResult, WriterError> {
        tracing::info!(ledger = %self.ledger, records = batch.len(), "Batch write");
        for (i, request) in batch.iter().enumerate() {
            tracing::info!(
                ledger = %self.ledger,
                position = i + 1,
                request_id = %request.request_id,
                producer = %request.producer_ref,
                payload = %request.payload,
                "Ledger record"
            );
        }
        Ok(BatchResult::all_success(batch))
    }

    fn writer_name(&self) -> &str {
        &self.ledger
    }
}
