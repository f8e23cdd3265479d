//! Per-process handle on the engine
//!
//! Aggregator instances, producer workflows and operator tools each hold
//! their own client. All calls are async to match a networked engine.

use crate::engine::{MockEngine, Query};
use crate::{Message, Result, stream::StreamItem};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct MockClient {
    /// Who is talking, for logs
    name: String,
    engine: Arc<MockEngine>,
}

impl MockClient {
    pub fn new(name: String, engine: Arc<MockEngine>) -> Self {
        Self { name, engine }
    }

    pub async fn ensure_stream(&self, name: &str) -> Result<()> {
        self.engine.ensure_stream(name)
    }

    /// Append messages to a stream, returning the first assigned sequence
    pub async fn publish_to_stream<M>(&self, stream_name: String, messages: Vec<M>) -> Result<u64>
    where
        M: Into<Message>,
    {
        self.engine
            .publish_to_stream(&stream_name, messages.into_iter().map(Into::into).collect())
    }

    /// Consume a stream from `start_sequence` onwards
    pub async fn stream_messages(
        &self,
        stream_name: String,
        start_sequence: Option<u64>,
    ) -> Result<MessageStream> {
        let receiver = self.engine.stream_messages(&stream_name, start_sequence)?;
        Ok(MessageStream { receiver })
    }

    /// Drop stream entries below `before_sequence`, returning how many went
    pub async fn truncate_stream(&self, stream_name: &str, before_sequence: u64) -> Result<usize> {
        self.engine.truncate_stream(stream_name, before_sequence)
    }

    /// Broadcast on a subject
    pub async fn publish<M>(&self, subject: &str, messages: Vec<M>) -> Result<()>
    where
        M: Into<Message>,
    {
        self.engine
            .publish(subject, messages.into_iter().map(Into::into).collect())
    }

    /// Deliver an addressed signal; fails when nobody is listening
    pub async fn deliver(&self, subject: &str, message: impl Into<Message>) -> Result<()> {
        tracing::trace!("{} delivering to {}", self.name, subject);
        self.engine.deliver(subject, message.into())
    }

    /// Open a mailbox on a subject pattern.
    ///
    /// Queue groups are accepted for API parity and ignored: every matching
    /// mailbox gets its own copy.
    pub async fn subscribe(
        &self,
        subject_pattern: &str,
        _queue_group: Option<String>,
    ) -> Result<PubSubMessageStream> {
        let receiver = self.engine.subscribe(subject_pattern);
        Ok(PubSubMessageStream { receiver })
    }

    /// Become the handler answering queries on `subject`
    pub async fn serve_queries(&self, subject: &str) -> Result<QueryStream> {
        let receiver = self.engine.serve_queries(subject);
        Ok(QueryStream { receiver })
    }

    /// Query the handler of `subject`
    pub async fn query(
        &self,
        subject: &str,
        message: impl Into<Message>,
        timeout: Duration,
    ) -> Result<Message> {
        self.engine.query(subject, message.into(), timeout).await
    }
}

/// Stream consumer yielding messages with their append time and sequence
pub struct MessageStream {
    receiver: mpsc::UnboundedReceiver<StreamItem>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }
}

impl futures::Stream for MessageStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        self.receiver.poll_recv(cx)
    }
}

/// Mailbox of signals received on a subject pattern
pub struct PubSubMessageStream {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl PubSubMessageStream {
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Next signal if one is already waiting
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

impl futures::Stream for PubSubMessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

/// Queries addressed to a served subject
pub struct QueryStream {
    receiver: mpsc::UnboundedReceiver<Query>,
}

impl QueryStream {
    pub async fn recv(&mut self) -> Option<Query> {
        self.receiver.recv().await
    }

    /// Next query if one is already waiting
    pub fn try_recv(&mut self) -> Option<Query> {
        self.receiver.try_recv().ok()
    }
}
