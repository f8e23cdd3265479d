//! Hosting an aggregator across continue-as-new
//!
//! The host owns the lifecycle of one aggregator id: it resumes from the
//! latest checkpoint (or starts fresh), runs instances back to back while they
//! continue as new, and persists the final state on shutdown.

use crate::aggregator::{Aggregator, RunOutcome, save_checkpoint, trim_inbox};
use crate::config::BatcherConfig;
use crate::error::{BatcherError, Result};
use crate::state::AggregatorState;
use crate::stats::StatsClient;
use crate::writer::BatchWriter;
use proven_common::subjects;
use proven_engine::MockClient;
use proven_snapshot::CheckpointStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running aggregator
pub struct BatcherHost {
    id: String,
    client: Arc<MockClient>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<AggregatorState>>,
}

impl BatcherHost {
    /// Start the aggregator `id`, resuming from its latest checkpoint if one exists
    pub async fn start_or_resume(
        id: impl Into<String>,
        client: Arc<MockClient>,
        writer: Arc<dyn BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatcherConfig,
    ) -> Result<Self> {
        let id = id.into();
        config.validate()?;

        client.ensure_stream(&subjects::inbox_stream(&id)).await?;

        let state = match checkpoints.latest_checkpoint(&id)? {
            Some((metadata, data)) => {
                let state = AggregatorState::decode(&data)?;
                if state.processed.capacity() != config.dedup_window_size {
                    tracing::warn!(
                        "[{}] Configured dedup window of {} ignored, resuming with the checkpoint's {}",
                        id,
                        config.dedup_window_size,
                        state.processed.capacity()
                    );
                }
                tracing::info!(
                    "[{}] Resuming from checkpoint {} (generation {}, {} pending, {} batches done)",
                    id,
                    metadata.checkpoint_id,
                    metadata.generation,
                    state.pending.len(),
                    state.batches_completed
                );
                state
            }
            None => {
                tracing::info!("[{}] No checkpoint found, starting fresh", id);
                AggregatorState::new(config.dedup_window_size)
            }
        };

        // Attach the first instance before returning so submits and queries
        // issued right after start are handled by it
        let first = Aggregator::new(
            id.clone(),
            client.clone(),
            writer.clone(),
            checkpoints.clone(),
            config.clone(),
            state,
        )
        .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_instances(
            id.clone(),
            first,
            client.clone(),
            writer,
            checkpoints,
            config,
            shutdown_rx,
        ));

        Ok(Self {
            id,
            client,
            shutdown_tx,
            task,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stats reader for this aggregator
    pub fn stats_client(&self) -> StatsClient {
        StatsClient::new(self.client.clone(), self.id.clone())
    }

    /// Whether an instance is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the running instance and return the state it stopped with.
    ///
    /// The state is saved as a checkpoint first, so a later `start_or_resume`
    /// picks up exactly here.
    pub async fn shutdown(self) -> Result<AggregatorState> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| BatcherError::TaskFailed(e.to_string()))?
    }
}

/// Run instances of one aggregator until shutdown
async fn run_instances(
    id: String,
    first: Aggregator,
    client: Arc<MockClient>,
    writer: Arc<dyn BatchWriter>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: BatcherConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<AggregatorState> {
    let mut instance = first;

    loop {
        match instance.run(shutdown_rx.clone()).await {
            Ok(RunOutcome::ContinuedAsNew(handoff)) => {
                instance = Aggregator::continue_from(
                    id.clone(),
                    client.clone(),
                    writer.clone(),
                    checkpoints.clone(),
                    config.clone(),
                    handoff,
                )
                .await?;
            }
            Ok(RunOutcome::Shutdown(last)) => {
                save_checkpoint(&*checkpoints, &id, &last, config.checkpoints_retained)?;
                trim_inbox(&client, &id, last.next_inbox_sequence).await;
                tracing::info!(
                    "[{}] Aggregator stopped (restarts: {}, pending: {}, batches: {})",
                    id,
                    last.restarts,
                    last.pending.len(),
                    last.batches_completed
                );
                return Ok(last);
            }
            Err(e) => {
                tracing::error!("[{}] Aggregator instance failed: {}", id, e);
                return Err(e);
            }
        }
    }
}
