//! Error types for producer workflows

use proven_common::{FailureReason, RequestId};
use std::time::Duration;
use thiserror::Error;

/// Why a producer workflow failed. Every variant is terminal.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Business preparation failed: {0}")]
    Preparation(String),

    #[error("Could not submit write request after {attempts} attempts: {reason}")]
    Submission { attempts: u32, reason: String },

    #[error("Write {request_id} was not confirmed within {waited:?}")]
    ConfirmationTimeout {
        request_id: RequestId,
        waited: Duration,
    },

    #[error("Write {request_id} failed: {reason}")]
    WriteFailed {
        request_id: RequestId,
        reason: FailureReason,
    },

    #[error("Business finalization failed: {0}")]
    Finalization(String),

    #[error("Engine error: {0}")]
    Engine(#[from] proven_engine::MockEngineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Workflow task failed: {0}")]
    TaskFailed(String),
}

/// Result type for producer operations
pub type Result<T> = std::result::Result<T, ProducerError>;
