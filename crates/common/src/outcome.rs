//! Write outcomes and the confirmation message sent back to producers

use crate::RequestId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a write was not performed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The batch writer stayed unreachable after every retry
    WriterUnavailable,

    /// The writer answered for the batch but said nothing about this request
    MissingOutcome,

    /// The writer rejected this request
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::WriterUnavailable => f.write_str("writer unavailable"),
            FailureReason::MissingOutcome => f.write_str("no outcome reported for request"),
            FailureReason::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

/// Per-request result of a batch write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    Success,
    Failure(FailureReason),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Success)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        WriteOutcome::Failure(FailureReason::Rejected(reason.into()))
    }
}

/// Confirm message from the aggregator to one producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub request_id: RequestId,
    pub outcome: WriteOutcome,

    /// Sequence number of the batch that carried the request (1-based)
    pub batch: u64,

    /// Number of requests in that batch
    pub batch_size: usize,
}

impl Confirmation {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::WriterUnavailable.to_string(),
            "writer unavailable"
        );
        assert_eq!(
            FailureReason::Rejected("constraint violated".into()).to_string(),
            "rejected: constraint violated"
        );
    }

    #[test]
    fn test_confirmation_carries_failure_reason() {
        let confirmation = Confirmation {
            request_id: RequestId::from("wr-1"),
            outcome: WriteOutcome::rejected("duplicate key"),
            batch: 3,
            batch_size: 7,
        };

        let decoded = Confirmation::decode(&confirmation.encode().unwrap()).unwrap();
        assert!(!decoded.outcome.is_success());
        assert_eq!(
            decoded.outcome,
            WriteOutcome::Failure(FailureReason::Rejected("duplicate key".into()))
        );
    }
}
