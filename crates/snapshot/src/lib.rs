//! Checkpoint storage trait and types for continue-as-new
//!
//! A long-lived process bounds its history by checkpointing its state and
//! relaunching from it. Stores persist the serialized state together with a
//! checksum; a checkpoint is visible only once it has been written completely.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for checkpoint {checkpoint_id} of {owner}")]
    ChecksumMismatch { owner: String, checkpoint_id: Uuid },

    #[error("Corrupt checkpoint metadata: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Metadata about a stored checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Unique, time-ordered id of this checkpoint
    pub checkpoint_id: Uuid,
    /// Process the checkpoint belongs to
    pub owner: String,
    /// Monotonic generation (restart count of the instance it seeds)
    pub generation: u64,
    /// Size of checkpoint data in bytes
    pub size_bytes: u64,
    /// Hex SHA-256 of the checkpoint data
    pub checksum: String,
    /// System time when the checkpoint was created (ms since epoch)
    pub created_at: u64,
}

impl CheckpointMetadata {
    /// Describe `data` as generation `generation` of `owner`
    pub fn describe(owner: &str, generation: u64, data: &[u8]) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            checkpoint_id: Uuid::now_v7(),
            owner: owner.to_string(),
            generation,
            size_bytes: data.len() as u64,
            checksum: checksum(data),
            created_at,
        }
    }

    /// Check that `data` is what this metadata describes
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 != self.size_bytes || checksum(data) != self.checksum {
            return Err(CheckpointError::ChecksumMismatch {
                owner: self.owner.clone(),
                checkpoint_id: self.checkpoint_id,
            });
        }
        Ok(())
    }
}

/// Hex SHA-256 of checkpoint data
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Trait for checkpoint storage backends
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint. Either the whole checkpoint becomes the latest one
    /// or the call fails and the previous latest checkpoint is unchanged.
    fn save_checkpoint(
        &self,
        owner: &str,
        generation: u64,
        data: Vec<u8>,
    ) -> Result<CheckpointMetadata>;

    /// Get the latest (highest generation) checkpoint for an owner
    fn latest_checkpoint(&self, owner: &str) -> Result<Option<(CheckpointMetadata, Vec<u8>)>>;

    /// List all checkpoints for an owner (sorted by generation, newest first)
    fn list_checkpoints(&self, owner: &str) -> Result<Vec<CheckpointMetadata>>;

    /// Delete old checkpoints, keeping only the N most recent
    fn cleanup_old_checkpoints(&self, owner: &str, keep_count: usize) -> Result<()>;
}
