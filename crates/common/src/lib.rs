//! Common types for batched writes
//!
//! This crate defines:
//! - Deterministic request ids (SHA-256 over the logical request)
//! - Write requests and producer back-references
//! - Write outcomes and confirmations
//! - Physical timestamps (microseconds since Unix epoch)
//! - Stream/subject naming shared by both sides of the handshake

mod outcome;
mod request;
mod request_id;
pub mod subjects;
mod timestamp;

pub use outcome::{Confirmation, FailureReason, WriteOutcome};
pub use request::{ProducerRef, WriteRequest};
pub use request_id::RequestId;
pub use timestamp::Timestamp;
