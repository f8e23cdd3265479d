//! Error types for the batcher

use thiserror::Error;

/// Batcher errors
#[derive(Debug, Error)]
pub enum BatcherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine error: {0}")]
    Engine(#[from] proven_engine::MockEngineError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] proven_snapshot::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported aggregator snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Inbox stream closed for aggregator {0}")]
    InboxClosed(String),

    #[error("Aggregator task failed: {0}")]
    TaskFailed(String),
}

/// Result type for batcher operations
pub type Result<T> = std::result::Result<T, BatcherError>;
