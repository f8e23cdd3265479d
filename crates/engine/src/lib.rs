//! In-memory durable execution substrate
//!
//! Long-lived processes need four things from the engine they run on:
//! - an ordered, replayable inbox per process (streams)
//! - addressed signal mailboxes
//! - queries answered by the process currently serving a subject
//! - bounded retries for activities
//!
//! This crate provides all of them in memory, behind the same async client
//! API a networked engine would expose.

use thiserror::Error;

pub mod client;
pub mod engine;
pub mod message;
pub mod retry;
pub mod stream;

pub use client::{MessageStream, MockClient, PubSubMessageStream, QueryStream};
pub use engine::{MockEngine, Query};
pub use message::Message;
pub use retry::{Exhausted, RetryPolicy};
pub use stream::StreamItem;

#[derive(Debug, Error)]
pub enum MockEngineError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("No subscribers for subject: {0}")]
    NoSubscribers(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MockEngineError>;
