//! Test double for the batch writer

use crate::writer::{BatchResult, BatchWriter, WriterError};
use async_trait::async_trait;
use parking_lot::Mutex;
use proven_common::{RequestId, WriteOutcome, WriteRequest};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Default)]
struct Script {
    transient_failures: u32,
    always_fail: bool,
    delay: Option<Duration>,
    rejections: HashMap<RequestId, String>,
    omissions: HashSet<RequestId>,
}

/// Writer that records every batch it is asked to write.
///
/// Failures are scripted: a number of leading transient failures, permanent
/// unavailability, per-request rejections, omitted outcomes or a delay per call.
#[derive(Default)]
pub struct RecordingWriter {
    batches: Mutex<Vec<Vec<RequestId>>>,
    attempts: Mutex<u32>,
    script: Mutex<Script>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.script.lock().transient_failures = count;
    }

    /// Fail every call until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.script.lock().always_fail = unavailable;
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.script.lock().delay = delay;
    }

    /// Report `request_id` as rejected whenever it is written
    pub fn reject(&self, request_id: RequestId, reason: impl Into<String>) {
        self.script.lock().rejections.insert(request_id, reason.into());
    }

    /// Leave `request_id` out of the result whenever it is written
    pub fn omit(&self, request_id: RequestId) {
        self.script.lock().omissions.insert(request_id);
    }

    /// Request ids of each successful call, in call order
    pub fn batches(&self) -> Vec<Vec<RequestId>> {
        self.batches.lock().clone()
    }

    /// Total calls, failed ones included
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// Every request id written so far, across batches
    pub fn written(&self) -> Vec<RequestId> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl BatchWriter for RecordingWriter {
    async fn write_batch(&self, batch: &[WriteRequest]) -> Result<BatchResult, WriterError> {
        *self.attempts.lock() += 1;

        let delay = self.script.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut script = self.script.lock();
            if script.always_fail {
                return Err(WriterError::Transient("writer unavailable".into()));
            }
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(WriterError::Transient("scripted failure".into()));
            }

            let mut result = BatchResult::new();
            for request in batch {
                if script.omissions.contains(&request.request_id) {
                    continue;
                }
                let outcome = match script.rejections.get(&request.request_id) {
                    Some(reason) => WriteOutcome::rejected(reason.clone()),
                    None => WriteOutcome::Success,
                };
                result.set(request.request_id.clone(), outcome);
            }
            result
        };

        self.batches
            .lock()
            .push(batch.iter().map(|r| r.request_id.clone()).collect());
        Ok(result)
    }

    fn writer_name(&self) -> &str {
        "recording"
    }
}
