//! Producer workflow: prepare, submit one write, await its confirmation
//!
//! The request id is derived from the workflow id and the operation name, so
//! a resubmission (or a rerun of the same workflow) carries the same id and is
//! absorbed by the aggregator's dedup.

use crate::config::ProducerConfig;
use crate::error::{ProducerError, Result};
use crate::steps::ProducerSteps;
use parking_lot::RwLock;
use proven_common::{
    Confirmation, ProducerRef, RequestId, WriteOutcome, WriteRequest, subjects,
};
use proven_engine::{Exhausted, Message, MockClient, PubSubMessageStream};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Operation name the write request id is derived from
pub const WRITE_OPERATION: &str = "write";

/// Where a producer workflow is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerPhase {
    Preparing,
    Submitting,
    AwaitingConfirmation,
    Finalizing,
    Completed,
    Failed,
}

/// Answer to a status query on a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerStatus {
    pub workflow_id: String,
    pub request_id: Option<RequestId>,
    pub phase: ProducerPhase,

    /// Time left before the confirmation wait gives up, while awaiting it
    pub deadline_remaining: Option<Duration>,
}

/// Result of a completed producer workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerReceipt {
    pub workflow_id: String,
    pub request_id: RequestId,

    /// Payload produced by the preparation step and written
    pub prepared: serde_json::Value,

    /// Output of the finalization step
    pub finalized: String,
}

struct Progress {
    phase: ProducerPhase,
    request_id: Option<RequestId>,
    deadline: Option<Instant>,
}

/// A producer workflow ready to run
pub struct ProducerWorkflow {
    workflow_id: String,
    aggregator_id: String,
    client: Arc<MockClient>,
    steps: Arc<dyn ProducerSteps>,
    config: ProducerConfig,
    progress: Arc<RwLock<Progress>>,
}

impl ProducerWorkflow {
    pub fn new(
        workflow_id: impl Into<String>,
        aggregator_id: impl Into<String>,
        client: Arc<MockClient>,
        steps: Arc<dyn ProducerSteps>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            aggregator_id: aggregator_id.into(),
            client,
            steps,
            config,
            progress: Arc::new(RwLock::new(Progress {
                phase: ProducerPhase::Preparing,
                request_id: None,
                deadline: None,
            })),
        }
    }

    /// Run the workflow on its own task
    pub fn spawn(self, input: impl Into<String>) -> ProducerHandle {
        let workflow_id = self.workflow_id.clone();
        let progress = self.progress.clone();
        let input = input.into();
        let task = tokio::spawn(async move { self.run(&input).await });

        ProducerHandle {
            workflow_id,
            progress,
            task,
        }
    }

    /// Run the workflow to completion on the current task
    pub async fn run(self, input: &str) -> Result<ProducerReceipt> {
        tracing::info!("Starting producer workflow {}", self.workflow_id);

        match self.execute(input).await {
            Ok(receipt) => {
                self.set_phase(ProducerPhase::Completed);
                tracing::info!(
                    "Producer workflow {} completed (request {})",
                    self.workflow_id,
                    receipt.request_id
                );
                Ok(receipt)
            }
            Err(e) => {
                self.set_phase(ProducerPhase::Failed);
                tracing::error!("Producer workflow {} failed: {}", self.workflow_id, e);
                Err(e)
            }
        }
    }

    async fn execute(&self, input: &str) -> Result<ProducerReceipt> {
        let workflow_id = self.workflow_id.as_str();

        self.set_phase(ProducerPhase::Preparing);
        let prepared = self
            .run_step(|| self.steps.prepare(workflow_id, input))
            .await
            .map_err(|e| ProducerError::Preparation(e.to_string()))?;

        let request_id = RequestId::derive(workflow_id, WRITE_OPERATION);
        self.progress.write().request_id = Some(request_id.clone());
        let request = WriteRequest::new(
            request_id.clone(),
            ProducerRef::new(workflow_id),
            prepared.clone(),
        );

        // Open the mailbox first so a fast confirmation cannot be missed
        let mut mailbox = self
            .client
            .subscribe(&subjects::confirm_subject(workflow_id), None)
            .await?;

        self.set_phase(ProducerPhase::Submitting);
        self.submit(&request).await?;

        self.set_phase(ProducerPhase::AwaitingConfirmation);
        let confirmation = self.await_confirmation(&request_id, &mut mailbox).await?;
        drop(mailbox);

        if let WriteOutcome::Failure(reason) = confirmation.outcome.clone() {
            return Err(ProducerError::WriteFailed { request_id, reason });
        }

        self.set_phase(ProducerPhase::Finalizing);
        let finalized = self
            .run_step(|| self.steps.finalize(workflow_id, &confirmation))
            .await
            .map_err(|e| ProducerError::Finalization(e.to_string()))?;

        Ok(ProducerReceipt {
            workflow_id: self.workflow_id.clone(),
            request_id,
            prepared,
            finalized,
        })
    }

    /// Append the submit to the aggregator's inbox, retrying per the submit policy
    async fn submit(&self, request: &WriteRequest) -> Result<()> {
        let message = Message::submit(request)?;
        let inbox = subjects::inbox_stream(&self.aggregator_id);

        self.config
            .submit_retry
            .run(|attempt| {
                let message = message.clone();
                let inbox = inbox.clone();
                async move {
                    self.client
                        .publish_to_stream(inbox, vec![message])
                        .await
                        .map(|_| attempt)
                }
            })
            .await
            .map(|attempt| {
                tracing::info!(
                    "Submitted write request {} for {} (attempt {})",
                    request.request_id,
                    self.workflow_id,
                    attempt
                );
            })
            .map_err(|e| ProducerError::Submission {
                attempts: e.attempts,
                reason: e.last_error.to_string(),
            })
    }

    /// Wait for the confirmation of `request_id` or the deadline, whichever comes first
    async fn await_confirmation(
        &self,
        request_id: &RequestId,
        mailbox: &mut PubSubMessageStream,
    ) -> Result<Confirmation> {
        let waited = self.config.confirmation_timeout;
        let deadline = Instant::now() + waited;
        self.progress.write().deadline = Some(deadline);

        let result = loop {
            tokio::select! {
                biased;

                message = mailbox.recv() => {
                    let Some(message) = message else {
                        break Err(ProducerError::Engine(proven_engine::MockEngineError::ChannelClosed));
                    };
                    match Confirmation::decode(&message.body) {
                        Ok(confirmation) if &confirmation.request_id == request_id => {
                            tracing::info!(
                                "Received confirmation for {} (batch {} of {} writes, {})",
                                request_id,
                                confirmation.batch,
                                confirmation.batch_size,
                                if confirmation.outcome.is_success() { "success" } else { "failure" }
                            );
                            break Ok(confirmation);
                        }
                        Ok(other) => {
                            tracing::debug!(
                                "Workflow {} ignoring confirmation for {}",
                                self.workflow_id,
                                other.request_id
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Workflow {} got an invalid confirmation: {}", self.workflow_id, e);
                        }
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    tracing::error!(
                        "Write confirmation for {} not received after {:?}",
                        request_id,
                        waited
                    );
                    break Err(ProducerError::ConfirmationTimeout {
                        request_id: request_id.clone(),
                        waited,
                    });
                }
            }
        };

        self.progress.write().deadline = None;
        result
    }

    /// Run a business step as an activity: bounded attempts, each under the step timeout
    async fn run_step<T, F, Fut>(&self, mut step: F) -> std::result::Result<T, Exhausted<String>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let timeout = self.config.step_timeout;
        self.config
            .step_retry
            .run(|_| {
                let attempt = step();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("step timed out after {:?}", timeout)),
                    }
                }
            })
            .await
    }

    fn set_phase(&self, phase: ProducerPhase) {
        let mut progress = self.progress.write();
        if progress.phase != phase {
            tracing::debug!(
                "Workflow {} phase {:?} -> {:?}",
                self.workflow_id,
                progress.phase,
                phase
            );
            progress.phase = phase;
        }
    }
}

/// Handle to a spawned producer workflow
pub struct ProducerHandle {
    workflow_id: String,
    progress: Arc<RwLock<Progress>>,
    task: JoinHandle<Result<ProducerReceipt>>,
}

impl ProducerHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Current phase, request id and remaining confirmation wait
    pub fn status(&self) -> ProducerStatus {
        let progress = self.progress.read();
        ProducerStatus {
            workflow_id: self.workflow_id.clone(),
            request_id: progress.request_id.clone(),
            phase: progress.phase,
            deadline_remaining: progress
                .deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now())),
        }
    }

    /// Wait for the workflow to finish
    pub async fn result(self) -> Result<ProducerReceipt> {
        self.task
            .await
            .map_err(|e| ProducerError::TaskFailed(e.to_string()))?
    }
}
