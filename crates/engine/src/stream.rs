//! Inbox logs
//!
//! Every aggregator inbox is an append-only log. A consumer opened at
//! sequence N is first fed the stored entries from N onwards and then tails
//! later appends, with nothing lost in between since both happen under the
//! same lock. Entries a consumer has checkpointed past can be truncated;
//! sequences keep counting from where they were.

use crate::{Message, MockEngineError, Result};
use parking_lot::Mutex;
use proven_common::Timestamp;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::mpsc;

/// Item delivered to stream consumers: message, append time, sequence
pub type StreamItem = (Message, Timestamp, u64);

#[derive(Default)]
struct Log {
    entries: Vec<StreamItem>,
    /// Entries removed from the front by truncation
    truncated: u64,
    tails: Vec<mpsc::UnboundedSender<StreamItem>>,
    last_appended: Option<Timestamp>,
}

impl Log {
    /// Sequences start at 1 and have no gaps
    fn next_sequence(&self) -> u64 {
        self.truncated + self.entries.len() as u64 + 1
    }

    /// Index into `entries` of `sequence`, clamped to what is retained
    fn index_of(&self, sequence: u64) -> usize {
        let index = sequence.saturating_sub(self.truncated + 1) as usize;
        index.min(self.entries.len())
    }

    /// Wall clock time, nudged forward when the clock has not moved since the last append
    fn next_timestamp(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let stamp = match self.last_appended {
            Some(previous) if previous >= now => Timestamp::from_micros(previous.as_micros() + 1),
            _ => now,
        };
        self.last_appended = Some(stamp);
        stamp
    }

    fn append(&mut self, messages: Vec<Message>) -> u64 {
        let first = self.next_sequence();

        for message in messages {
            let sequence = self.next_sequence();
            let timestamp = self.next_timestamp();
            let item = (
                message.stamped(sequence, timestamp.as_micros()),
                timestamp,
                sequence,
            );

            self.tails.retain(|tail| tail.send(item.clone()).is_ok());
            self.entries.push(item);
        }

        first
    }

    fn tail_from(&mut self, from: u64) -> mpsc::UnboundedReceiver<StreamItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        let skip = self.index_of(from);

        for item in &self.entries[skip..] {
            // rx is still in hand, the send cannot fail
            let _ = tx.send(item.clone());
        }

        self.tails.push(tx);
        rx
    }

    /// Drop every entry below `sequence`, returning how many were removed
    fn truncate_before(&mut self, sequence: u64) -> usize {
        let removed = self.index_of(sequence);
        self.entries.drain(..removed);
        self.truncated += removed as u64;
        removed
    }
}

/// The named logs hosted by one engine
#[derive(Default)]
pub struct StreamManager {
    logs: Mutex<HashMap<String, Log>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the log `name`; false if it was already there
    pub fn create_stream(&self, name: &str) -> bool {
        match self.logs.lock().entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Log::default());
                true
            }
        }
    }

    /// Append to `name`, returning the sequence of the first appended message
    pub fn append_to_stream(&self, name: &str, messages: Vec<Message>) -> Result<u64> {
        self.with_log(name, |log| log.append(messages))
    }

    /// Open a consumer on `name` from `start_sequence` (the beginning if unset)
    pub fn create_consumer(
        &self,
        name: &str,
        start_sequence: Option<u64>,
    ) -> Result<mpsc::UnboundedReceiver<StreamItem>> {
        self.with_log(name, |log| log.tail_from(start_sequence.unwrap_or(1)))
    }

    /// Forget the entries of `name` below `sequence`.
    ///
    /// Consumers opened later from a truncated sequence start at the oldest
    /// retained entry.
    pub fn truncate_before(&self, name: &str, sequence: u64) -> Result<usize> {
        self.with_log(name, |log| log.truncate_before(sequence))
    }

    pub fn stream_exists(&self, name: &str) -> bool {
        self.logs.lock().contains_key(name)
    }

    /// Number of entries stored in `name`
    pub fn stream_len(&self, name: &str) -> Result<usize> {
        self.with_log(name, |log| log.entries.len())
    }

    fn with_log<T>(&self, name: &str, f: impl FnOnce(&mut Log) -> T) -> Result<T> {
        let mut logs = self.logs.lock();
        let log = logs
            .get_mut(name)
            .ok_or_else(|| MockEngineError::StreamNotFound(name.to_string()))?;
        Ok(f(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> Message {
        Message::with_body(text.as_bytes().to_vec())
    }

    #[test]
    fn test_consumer_sees_history_then_live_appends() {
        let mut log = Log::default();
        log.append(vec![body("a"), body("b")]);

        let mut rx = log.tail_from(2);
        log.append(vec![body("c")]);

        let (first, _, seq1) = rx.try_recv().unwrap();
        let (second, _, seq2) = rx.try_recv().unwrap();
        assert_eq!((first.body.as_slice(), seq1), (b"b".as_slice(), 2));
        assert_eq!((second.body.as_slice(), seq2), (b"c".as_slice(), 3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_consumer_past_end_only_sees_live() {
        let mut log = Log::default();
        log.append(vec![body("a")]);

        let mut rx = log.tail_from(log.next_sequence());
        assert!(rx.try_recv().is_err());

        log.append(vec![body("b")]);
        let (message, _, sequence) = rx.try_recv().unwrap();
        assert_eq!(sequence, 2);
        assert_eq!(message.sequence, Some(2));
        assert!(message.timestamp.is_some());
    }

    #[test]
    fn test_dropped_consumers_are_pruned() {
        let mut log = Log::default();
        let rx = log.tail_from(1);
        drop(rx);

        log.append(vec![body("a")]);
        assert!(log.tails.is_empty());
    }

    #[test]
    fn test_large_history_is_replayed_in_full() {
        let manager = StreamManager::new();
        assert!(manager.create_stream("batcher.main.inbox"));
        assert!(!manager.create_stream("batcher.main.inbox"));

        let batch: Vec<Message> = (0..2_500).map(|i| body(&format!("m{}", i))).collect();
        assert_eq!(manager.append_to_stream("batcher.main.inbox", batch).unwrap(), 1);

        let mut rx = manager.create_consumer("batcher.main.inbox", None).unwrap();
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2_500);
        assert_eq!(manager.stream_len("batcher.main.inbox").unwrap(), 2_500);
    }

    #[test]
    fn test_truncation_keeps_sequence_numbering() {
        let manager = StreamManager::new();
        manager.create_stream("batcher.main.inbox");
        let batch: Vec<Message> = (0..5).map(|i| body(&format!("m{}", i))).collect();
        manager.append_to_stream("batcher.main.inbox", batch).unwrap();

        assert_eq!(manager.truncate_before("batcher.main.inbox", 4).unwrap(), 3);
        assert_eq!(manager.stream_len("batcher.main.inbox").unwrap(), 2);
        // Already gone
        assert_eq!(manager.truncate_before("batcher.main.inbox", 2).unwrap(), 0);

        let next = manager
            .append_to_stream("batcher.main.inbox", vec![body("m5")])
            .unwrap();
        assert_eq!(next, 6);

        let mut rx = manager.create_consumer("batcher.main.inbox", Some(1)).unwrap();
        let sequences: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|(_, _, sequence)| sequence)
            .collect();
        assert_eq!(sequences, vec![4, 5, 6]);

        let mut rx = manager.create_consumer("batcher.main.inbox", Some(5)).unwrap();
        assert_eq!(rx.try_recv().unwrap().2, 5);
    }

    #[test]
    fn test_truncating_past_the_end_empties_the_log() {
        let mut log = Log::default();
        log.append(vec![body("a"), body("b")]);

        assert_eq!(log.truncate_before(100), 2);
        assert!(log.entries.is_empty());
        assert_eq!(log.next_sequence(), 3);
    }

    #[test]
    fn test_missing_stream() {
        let manager = StreamManager::new();
        assert!(matches!(
            manager.create_consumer("nowhere", None),
            Err(MockEngineError::StreamNotFound(_))
        ));
    }
}
