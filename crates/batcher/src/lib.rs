//! Write aggregator with exactly-once confirmation
//!
//! Producers submit write requests into the aggregator's inbox. The
//! aggregator deduplicates them, cuts batches by size or time, hands each
//! batch to a `BatchWriter` and sends every producer exactly one
//! confirmation. To bound its history it periodically checkpoints its state
//! and continues as a fresh instance.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod host;
pub mod monitor;
pub mod state;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod window;
pub mod writer;

pub use aggregator::{Aggregator, Handoff, RunOutcome};
pub use config::BatcherConfig;
pub use error::{BatcherError, Result};
pub use host::BatcherHost;
pub use state::{Admission, AggregatorState, PendingSet, SNAPSHOT_VERSION};
pub use stats::{BatcherStats, StatsClient};
pub use window::ProcessedWindow;
pub use writer::{BatchResult, BatchWriter, LoggingWriter, WriterError};
