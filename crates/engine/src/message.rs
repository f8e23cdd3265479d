//! Messages carried by the engine
//!
//! Inbox entries, confirmation signals and query replies all travel as a
//! `Message`: an opaque body plus string headers. Stream appends stamp the
//! message with its sequence and append time.

use proven_common::subjects::{KIND_CONFIRM, KIND_HEADER, KIND_SUBMIT, REQUEST_ID_HEADER};
use proven_common::{Confirmation, WriteRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,

    /// Position in the stream, set on append
    pub sequence: Option<u64>,

    /// Append time in microseconds, set on append
    pub timestamp: Option<u64>,
}

impl Message {
    pub fn with_body(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Inbox entry submitting `request` to an aggregator
    pub fn submit(request: &WriteRequest) -> serde_json::Result<Self> {
        Ok(Self::with_body(request.encode()?)
            .with_header(KIND_HEADER, KIND_SUBMIT)
            .with_header(REQUEST_ID_HEADER, request.request_id.as_str()))
    }

    /// Signal carrying `confirmation` to a producer mailbox
    pub fn confirmation(confirmation: &Confirmation) -> serde_json::Result<Self> {
        Ok(Self::with_body(confirmation.encode()?)
            .with_header(KIND_HEADER, KIND_CONFIRM)
            .with_header(REQUEST_ID_HEADER, confirmation.request_id.as_str()))
    }

    pub(crate) fn stamped(mut self, sequence: u64, timestamp: u64) -> Self {
        self.sequence = Some(sequence);
        self.timestamp = Some(timestamp);
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.header(KIND_HEADER)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Message::with_body(body)
    }
}
