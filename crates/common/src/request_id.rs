//! Deterministic write request identifiers
//!
//! A request id must be a pure function of the logical request so that a
//! producer which resubmits (after a retry, a crash, or a replay) produces the
//! same id and the aggregator can recognise the duplicate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix carried by every derived request id
const PREFIX: &str = "wr-";

/// Number of hex characters kept from the digest (128 bits)
const DIGEST_HEX_LEN: usize = 32;

/// Identifier of a single logical write request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Derive the id for `operation` issued by the producer `workflow_id`.
    ///
    /// The id is `wr-` followed by the first 128 bits (hex) of
    /// `SHA-256(workflow_id || 0x00 || operation)`. Attempt counters, run ids
    /// and clocks are not inputs.
    pub fn derive(workflow_id: &str, operation: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workflow_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(operation.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self(format!("{}{}", PREFIX, &digest[..DIGEST_HEX_LEN]))
    }

    /// Wrap an externally supplied id (tests, replays of old messages)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
