//! Write requests submitted by producers to the aggregator

use crate::{RequestId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Back-reference used to route a confirmation to the producer that asked
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerRef(String);

impl ProducerRef {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self(workflow_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single durable write, identified by its request id.
///
/// Immutable once created; the aggregator never edits a request, it only moves
/// it from pending into a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub request_id: RequestId,
    pub producer_ref: ProducerRef,
    pub payload: serde_json::Value,
    pub submitted_at: Timestamp,
}

impl WriteRequest {
    pub fn new(request_id: RequestId, producer_ref: ProducerRef, payload: serde_json::Value) -> Self {
        Self {
            request_id,
            producer_ref,
            payload,
            submitted_at: Timestamp::now(),
        }
    }

    /// Serialize for a message body
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse from a message body
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
