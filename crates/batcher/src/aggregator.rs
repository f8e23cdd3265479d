//! Aggregator instance: the batching state machine
//!
//! One instance owns the `AggregatorState` and handles its events strictly one
//! at a time: inbox submits, the batch timer and stats queries. An instance
//! ends either by continuing as new (after a checkpoint was saved) or on
//! shutdown; the host then relaunches or persists accordingly.

use crate::config::BatcherConfig;
use crate::error::{BatcherError, Result};
use crate::state::{Admission, AggregatorState};
use crate::stats::BatcherStats;
use crate::writer::{BatchResult, BatchWriter, WriterError};
use proven_common::{
    Confirmation, FailureReason, WriteOutcome, WriteRequest, subjects, subjects::KIND_SUBMIT,
};
use proven_engine::{Exhausted, Message, MessageStream, MockClient, Query, QueryStream};
use proven_snapshot::CheckpointStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// How an aggregator instance ended
pub enum RunOutcome {
    /// A checkpoint holding the handed-over state was saved; a fresh instance must take over
    ContinuedAsNew(Handoff),

    /// Shutdown was requested; this is the state at the point of stopping
    Shutdown(AggregatorState),
}

/// What an outgoing instance passes to its successor.
///
/// Besides the state it carries the stats query handler, so queries queued
/// during the handoff are answered by the successor instead of being lost.
pub struct Handoff {
    pub state: AggregatorState,
    queries: QueryStream,
}

/// A single running aggregator instance
pub struct Aggregator {
    id: String,
    client: Arc<MockClient>,
    writer: Arc<dyn BatchWriter>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: BatcherConfig,
    state: AggregatorState,
    inbox: MessageStream,
    queries: QueryStream,
    batch_deadline: Option<Instant>,
}

impl Aggregator {
    /// Seed an instance with `state` and attach it to its inbox and stats subject.
    ///
    /// The inbox consumer starts at `state.next_inbox_sequence`, so every
    /// event the predecessor handled is skipped and none is missed.
    pub async fn new(
        id: impl Into<String>,
        client: Arc<MockClient>,
        writer: Arc<dyn BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatcherConfig,
        state: AggregatorState,
    ) -> Result<Self> {
        let id = id.into();
        let queries = client.serve_queries(&subjects::stats_subject(&id)).await?;
        Self::attach(id, client, writer, checkpoints, config, state, queries).await
    }

    /// Take over from an instance that continued as new
    pub async fn continue_from(
        id: impl Into<String>,
        client: Arc<MockClient>,
        writer: Arc<dyn BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatcherConfig,
        handoff: Handoff,
    ) -> Result<Self> {
        let Handoff { state, queries } = handoff;
        Self::attach(id.into(), client, writer, checkpoints, config, state, queries).await
    }

    async fn attach(
        id: String,
        client: Arc<MockClient>,
        writer: Arc<dyn BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatcherConfig,
        state: AggregatorState,
        queries: QueryStream,
    ) -> Result<Self> {
        let inbox = client
            .stream_messages(subjects::inbox_stream(&id), Some(state.next_inbox_sequence))
            .await?;

        // Carried-over work keeps the deadline it had
        let batch_deadline = if state.pending.is_empty() {
            None
        } else {
            let remaining = state
                .batch_time_remaining
                .unwrap_or(config.batch_time_threshold);
            Some(Instant::now() + remaining)
        };

        Ok(Self {
            id,
            client,
            writer,
            checkpoints,
            config,
            state,
            inbox,
            queries,
            batch_deadline,
        })
    }

    /// Handle events until the instance continues as new or is shut down
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunOutcome> {
        tracing::info!(
            "[{}] Aggregator instance started (restarts: {}, pending: {}, inbox sequence: {})",
            self.id,
            self.state.restarts,
            self.state.pending.len(),
            self.state.next_inbox_sequence
        );

        if *shutdown.borrow() {
            return Ok(RunOutcome::Shutdown(self.into_state()));
        }

        loop {
            let deadline = self.batch_deadline;

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("[{}] Shutdown requested", self.id);
                        return Ok(RunOutcome::Shutdown(self.into_state()));
                    }
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::debug!("[{}] Batch timer fired", self.id);
                    self.cut_batch().await;
                }

                item = self.inbox.recv() => {
                    let Some((message, _, sequence)) = item else {
                        return Err(BatcherError::InboxClosed(self.id));
                    };
                    if let Some(state) = self.on_inbox_message(message, sequence).await {
                        return Ok(RunOutcome::ContinuedAsNew(Handoff {
                            state,
                            queries: self.queries,
                        }));
                    }
                }

                Some(query) = self.queries.recv() => {
                    self.on_stats_query(query);
                }
            }
        }
    }

    /// Handle one inbox entry; returns the successor state if a checkpoint was taken
    async fn on_inbox_message(&mut self, message: Message, sequence: u64) -> Option<AggregatorState> {
        if sequence < self.state.next_inbox_sequence {
            tracing::debug!("[{}] Skipping inbox sequence {} already handled", self.id, sequence);
            return None;
        }
        self.state.next_inbox_sequence = sequence + 1;

        if message.kind() != Some(KIND_SUBMIT) {
            tracing::warn!(
                "[{}] Ignoring inbox message {} of unknown kind {:?}",
                self.id,
                sequence,
                message.kind()
            );
            return None;
        }

        match WriteRequest::decode(&message.body) {
            Ok(request) => self.on_write_request(request).await,
            Err(e) => {
                tracing::warn!("[{}] Dropping malformed submit at {}: {}", self.id, sequence, e);
                return None;
            }
        }

        self.maybe_checkpoint().await
    }

    async fn on_write_request(&mut self, request: WriteRequest) {
        let request_id = request.request_id.clone();
        let producer = request.producer_ref.clone();

        match self.state.admit(request) {
            Admission::AlreadyProcessed => {
                tracing::debug!("[{}] Duplicate of processed request {} absorbed", self.id, request_id);
            }
            Admission::AlreadyPending => {
                tracing::debug!("[{}] Duplicate of pending request {} absorbed", self.id, request_id);
            }
            Admission::Accepted { pending } => {
                tracing::info!(
                    "[{}] Added write request {} from {} (total pending: {})",
                    self.id,
                    request_id,
                    producer,
                    pending
                );
                if pending == 1 {
                    self.batch_deadline = Some(Instant::now() + self.config.batch_time_threshold);
                }
                if pending >= self.config.batch_size_threshold {
                    self.cut_batch().await;
                }
            }
        }
    }

    /// Take every pending request, write them as one batch and answer each producer
    async fn cut_batch(&mut self) {
        self.batch_deadline = None;

        let batch = self.state.pending.take_all();
        if batch.is_empty() {
            return;
        }

        let batch_number = self.state.batches_completed + 1;
        tracing::info!(
            "[{}] Processing batch {} of {} writes",
            self.id,
            batch_number,
            batch.len()
        );

        let mut result = match self.write_with_retry(&batch).await {
            Ok(result) => Some(result),
            Err(exhausted) => {
                tracing::error!(
                    "[{}] Batch {} write failed after {} attempts: {}",
                    self.id,
                    batch_number,
                    exhausted.attempts,
                    exhausted.last_error
                );
                None
            }
        };

        for request in &batch {
            let outcome = match result.as_mut() {
                Some(result) => result
                    .take(&request.request_id)
                    .unwrap_or(WriteOutcome::Failure(FailureReason::MissingOutcome)),
                None => WriteOutcome::Failure(FailureReason::WriterUnavailable),
            };
            self.confirm(request, outcome, batch_number, batch.len()).await;
            self.state.processed.insert(request.request_id.clone());
        }

        if let Some(result) = result {
            for unknown in result.request_ids() {
                tracing::warn!(
                    "[{}] Writer reported an outcome for {} which was not in batch {}",
                    self.id,
                    unknown,
                    batch_number
                );
            }
        }

        self.state.batches_completed = batch_number;
    }

    /// Invoke the writer under the configured retry policy and per-attempt timeout
    async fn write_with_retry(
        &self,
        batch: &[WriteRequest],
    ) -> std::result::Result<BatchResult, Exhausted<WriterError>> {
        let writer = &self.writer;
        let timeout = self.config.writer_timeout;

        self.config
            .writer_retry
            .run(|attempt| async move {
                tracing::debug!(
                    "Writer {} attempt {} for {} requests",
                    writer.writer_name(),
                    attempt,
                    batch.len()
                );
                match tokio::time::timeout(timeout, writer.write_batch(batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(WriterError::Timeout(timeout)),
                }
            })
            .await
    }

    /// Send the outcome to the request's producer.
    ///
    /// A failed delivery is only logged; the caller still marks the request
    /// processed so it can never be written twice.
    async fn confirm(
        &self,
        request: &WriteRequest,
        outcome: WriteOutcome,
        batch: u64,
        batch_size: usize,
    ) {
        let confirmation = Confirmation {
            request_id: request.request_id.clone(),
            outcome,
            batch,
            batch_size,
        };

        let message = match Message::confirmation(&confirmation) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    "[{}] Failed to encode confirmation for {}: {}",
                    self.id,
                    request.request_id,
                    e
                );
                return;
            }
        };
        let subject = subjects::confirm_subject(request.producer_ref.as_str());

        match self.client.deliver(&subject, message).await {
            Ok(()) => tracing::info!(
                "[{}] Confirmed write {} to {} ({})",
                self.id,
                request.request_id,
                request.producer_ref,
                if confirmation.outcome.is_success() { "success" } else { "failure" }
            ),
            Err(e) => tracing::error!(
                "[{}] Failed to deliver confirmation for {} to {}: {}",
                self.id,
                request.request_id,
                request.producer_ref,
                e
            ),
        }
    }

    /// Checkpoint and hand off once this instance has handled enough signals.
    ///
    /// Returns the successor state only if the checkpoint was saved; otherwise
    /// this instance keeps running and tries again after the next submit.
    async fn maybe_checkpoint(&mut self) -> Option<AggregatorState> {
        if self.state.signals_received_since_restart < self.config.checkpoint_signal_threshold {
            return None;
        }

        self.freeze_timer();
        let next = self.state.continue_as_new();
        if let Err(e) =
            save_checkpoint(&*self.checkpoints, &self.id, &next, self.config.checkpoints_retained)
        {
            tracing::warn!("[{}] Checkpoint failed, continuing: {}", self.id, e);
            return None;
        }

        tracing::info!(
            "[{}] Continuing as new after {} signals (restart {}, {} pending carried)",
            self.id,
            self.state.signals_received_since_restart,
            next.restarts,
            next.pending.len()
        );
        trim_inbox(&self.client, &self.id, next.next_inbox_sequence).await;
        Some(next)
    }

    /// Record the time left on the batch timer in the state
    fn freeze_timer(&mut self) {
        let now = Instant::now();
        self.state.batch_time_remaining = self
            .batch_deadline
            .map(|deadline| deadline.saturating_duration_since(now));
    }

    fn into_state(mut self) -> AggregatorState {
        self.freeze_timer();
        self.state
    }

    fn on_stats_query(&self, query: Query) {
        let stats = BatcherStats::from_state(&self.state, self.config.checkpoint_signal_threshold);
        match stats.to_message() {
            Ok(message) => {
                if !query.respond(message) {
                    tracing::debug!("[{}] Stats query abandoned before the reply", self.id);
                }
            }
            Err(e) => tracing::error!("[{}] Failed to serialize stats: {}", self.id, e),
        }
    }
}

/// Persist `state` as the checkpoint of generation `state.restarts` and prune older ones
pub(crate) fn save_checkpoint(
    checkpoints: &dyn CheckpointStore,
    id: &str,
    state: &AggregatorState,
    retained: usize,
) -> Result<()> {
    let data = state.encode()?;
    let metadata = checkpoints.save_checkpoint(id, state.restarts, data)?;
    tracing::debug!(
        "[{}] Saved checkpoint {} (generation {}, {} bytes)",
        id,
        metadata.checkpoint_id,
        metadata.generation,
        metadata.size_bytes
    );

    if let Err(e) = checkpoints.cleanup_old_checkpoints(id, retained.max(1)) {
        tracing::warn!("[{}] Failed to prune old checkpoints: {}", id, e);
    }
    Ok(())
}

/// Drop inbox entries a saved checkpoint has moved past
pub(crate) async fn trim_inbox(client: &MockClient, id: &str, before_sequence: u64) {
    if let Err(e) = client
        .truncate_stream(&subjects::inbox_stream(id), before_sequence)
        .await
    {
        tracing::warn!("[{}] Failed to trim inbox below {}: {}", id, before_sequence, e);
    }
}
