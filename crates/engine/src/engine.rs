//! The in-memory engine every client talks to
//!
//! It hosts three things: inbox logs (see [`crate::stream`]), signal
//! mailboxes addressed by dotted subjects, and query handlers that answer a
//! request on a subject with exactly one reply.

use crate::{
    Message, MockEngineError, Result,
    stream::{StreamItem, StreamManager},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A query waiting for its answer
pub struct Query {
    pub message: Message,
    reply: oneshot::Sender<Message>,
}

impl Query {
    /// Answer the query; false if the asker stopped waiting
    pub fn respond(self, answer: Message) -> bool {
        self.reply.send(answer).is_ok()
    }
}

/// Queries arriving for a subject served by one handler
pub type QueryReceiver = mpsc::UnboundedReceiver<Query>;

struct Mailbox {
    pattern: String,
    sender: mpsc::UnboundedSender<Message>,
}

/// Mock engine standing in for the durable execution substrate
#[derive(Default)]
pub struct MockEngine {
    streams: StreamManager,
    mailboxes: Mutex<Vec<Mailbox>>,
    handlers: Mutex<HashMap<String, mpsc::UnboundedSender<Query>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Create a stream unless it already exists
    pub fn ensure_stream(&self, name: &str) -> Result<()> {
        if self.streams.create_stream(name) {
            tracing::debug!("Created stream {}", name);
        }
        Ok(())
    }

    pub fn publish_to_stream(&self, stream_name: &str, messages: Vec<Message>) -> Result<u64> {
        self.streams.append_to_stream(stream_name, messages)
    }

    pub fn stream_messages(
        &self,
        stream_name: &str,
        start_sequence: Option<u64>,
    ) -> Result<mpsc::UnboundedReceiver<StreamItem>> {
        self.streams.create_consumer(stream_name, start_sequence)
    }

    pub fn truncate_stream(&self, stream_name: &str, before_sequence: u64) -> Result<usize> {
        let removed = self.streams.truncate_before(stream_name, before_sequence)?;
        tracing::debug!(
            "Truncated {} entries of {} below sequence {}",
            removed,
            stream_name,
            before_sequence
        );
        Ok(removed)
    }

    /// Broadcast to whoever listens on `subject`; nobody listening is fine
    pub fn publish(&self, subject: &str, messages: Vec<Message>) -> Result<()> {
        self.fan_out(subject, &messages);
        Ok(())
    }

    /// Deliver a signal to the mailbox(es) listening on `subject`.
    ///
    /// Fails with `NoSubscribers` when no live mailbox took the message.
    pub fn deliver(&self, subject: &str, message: Message) -> Result<()> {
        match self.fan_out(subject, std::slice::from_ref(&message)) {
            0 => Err(MockEngineError::NoSubscribers(subject.to_string())),
            _ => Ok(()),
        }
    }

    fn fan_out(&self, subject: &str, messages: &[Message]) -> usize {
        let mut mailboxes = self.mailboxes.lock();
        mailboxes.retain(|mailbox| !mailbox.sender.is_closed());

        mailboxes
            .iter()
            .filter(|mailbox| subject_matches(subject, &mailbox.pattern))
            .filter(|mailbox| {
                messages
                    .iter()
                    .all(|message| mailbox.sender.send(message.clone()).is_ok())
            })
            .count()
    }

    /// Open a mailbox on a subject pattern (`*` matches one token, `>` the rest)
    pub fn subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<Message> {
        let (sender, rx) = mpsc::unbounded_channel();
        self.mailboxes.lock().push(Mailbox {
            pattern: pattern.to_string(),
            sender,
        });
        rx
    }

    /// Take over answering queries on `subject` from any previous handler
    pub fn serve_queries(&self, subject: &str) -> QueryReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.lock().insert(subject.to_string(), tx);
        rx
    }

    /// Ask the handler of `subject` and wait up to `timeout` for its answer
    pub async fn query(&self, subject: &str, message: Message, timeout: Duration) -> Result<Message> {
        let (reply, answer) = oneshot::channel();
        {
            let handlers = self.handlers.lock();
            let handler = handlers
                .get(subject)
                .ok_or_else(|| MockEngineError::NoSubscribers(subject.to_string()))?;
            handler
                .send(Query { message, reply })
                .map_err(|_| MockEngineError::ChannelClosed)?;
        }

        tokio::time::timeout(timeout, answer)
            .await
            .map_err(|_| MockEngineError::Timeout)?
            .map_err(|_| MockEngineError::ChannelClosed)
    }
}

fn subject_matches(subject: &str, pattern: &str) -> bool {
    let mut tokens = subject.split('.');

    for expected in pattern.split('.') {
        if expected == ">" {
            return tokens.next().is_some();
        }
        match tokens.next() {
            Some(token) if expected == "*" || expected == token => {}
            _ => return false,
        }
    }

    tokens.next().is_none()
}
