//! Producer side of batched writes
//!
//! A producer workflow runs its business preparation, submits exactly one
//! write request to an aggregator and waits, with a deadline, for the
//! confirmation that decides whether the workflow completes or fails.

pub mod config;
pub mod error;
pub mod steps;
pub mod workflow;

pub use config::ProducerConfig;
pub use error::{ProducerError, Result};
pub use steps::{ProducerSteps, SimulatedWork};
pub use workflow::{
    ProducerHandle, ProducerPhase, ProducerReceipt, ProducerStatus, ProducerWorkflow,
    WRITE_OPERATION,
};
