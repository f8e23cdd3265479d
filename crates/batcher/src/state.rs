//! Aggregator state and the snapshot carried across continue-as-new
//!
//! `AggregatorState` is the only state the aggregator depends on. Everything
//! an instance needs to behave exactly like its predecessor travels in it:
//! the pending set, the processed window, the counters, the inbox position
//! and the time left until the pending set is cut.

use crate::error::{BatcherError, Result};
use crate::window::ProcessedWindow;
use proven_common::{RequestId, WriteRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 2;

/// Requests waiting for the next batch cut, in arrival order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<WriteRequest>", into = "Vec<WriteRequest>")]
pub struct PendingSet {
    requests: Vec<WriteRequest>,
    ids: HashSet<RequestId>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.ids.contains(id)
    }

    /// Add a request; false if its id is already pending
    pub fn insert(&mut self, request: WriteRequest) -> bool {
        if !self.ids.insert(request.request_id.clone()) {
            return false;
        }
        self.requests.push(request);
        true
    }

    /// Remove and return every pending request, in arrival order
    pub fn take_all(&mut self) -> Vec<WriteRequest> {
        self.ids.clear();
        std::mem::take(&mut self.requests)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteRequest> {
        self.requests.iter()
    }
}

impl From<Vec<WriteRequest>> for PendingSet {
    fn from(requests: Vec<WriteRequest>) -> Self {
        let mut pending = PendingSet::new();
        for request in requests {
            pending.insert(request);
        }
        pending
    }
}

impl From<PendingSet> for Vec<WriteRequest> {
    fn from(pending: PendingSet) -> Self {
        pending.requests
    }
}

/// What happened to a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Added to the pending set, which now holds `pending` requests
    Accepted { pending: usize },

    /// Already answered (still inside the processed window)
    AlreadyProcessed,

    /// Already waiting in the pending set
    AlreadyPending,
}

/// Full checkpointable aggregator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorState {
    /// Snapshot format version
    pub version: u32,

    pub pending: PendingSet,

    pub processed: ProcessedWindow,

    /// Accepted submits since this instance started
    pub signals_received_since_restart: u64,

    /// Batches cut and answered over the aggregator's lifetime
    pub batches_completed: u64,

    /// Continue-as-new count
    pub restarts: u64,

    /// Duplicate submits absorbed over the aggregator's lifetime
    pub duplicates_absorbed: u64,

    /// Sequence of the next inbox message to handle
    pub next_inbox_sequence: u64,

    /// Time left on the batch timer when the state was handed over.
    ///
    /// Only meaningful while `pending` is non-empty; a successor re-arms its
    /// timer with it.
    pub batch_time_remaining: Option<Duration>,
}

impl AggregatorState {
    /// State of a brand new aggregator
    pub fn new(dedup_window_size: usize) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            pending: PendingSet::new(),
            processed: ProcessedWindow::new(dedup_window_size),
            signals_received_since_restart: 0,
            batches_completed: 0,
            restarts: 0,
            duplicates_absorbed: 0,
            next_inbox_sequence: 1,
            batch_time_remaining: None,
        }
    }

    /// Dedup a submit and, if new, add it to the pending set
    pub fn admit(&mut self, request: WriteRequest) -> Admission {
        if self.processed.contains(&request.request_id) {
            self.duplicates_absorbed += 1;
            return Admission::AlreadyProcessed;
        }
        if !self.pending.insert(request) {
            self.duplicates_absorbed += 1;
            return Admission::AlreadyPending;
        }

        self.signals_received_since_restart += 1;
        Admission::Accepted {
            pending: self.pending.len(),
        }
    }

    /// Seed for the next instance: counters carried, restart count bumped,
    /// per-instance signal count reset
    pub fn continue_as_new(&self) -> Self {
        Self {
            signals_received_since_restart: 0,
            restarts: self.restarts + 1,
            ..self.clone()
        }
    }

    /// Serialize for a checkpoint
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore from checkpoint bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let state: AggregatorState = serde_json::from_slice(bytes)?;
        if state.version != SNAPSHOT_VERSION {
            return Err(BatcherError::UnsupportedVersion {
                found: state.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(state)
    }
}
