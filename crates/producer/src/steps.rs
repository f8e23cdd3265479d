//! Business steps around the durable write

use async_trait::async_trait;
use proven_common::Confirmation;
use serde_json::json;
use std::time::Duration;

/// Business logic a producer runs before and after its write.
///
/// Both steps are activities: the workflow retries them under its step
/// policy, so they must tolerate being run more than once.
#[async_trait]
pub trait ProducerSteps: Send + Sync {
    /// Produce the write payload from the workflow input
    async fn prepare(&self, workflow_id: &str, input: &str) -> Result<serde_json::Value, String>;

    /// Follow-up work once the write is confirmed
    async fn finalize(&self, workflow_id: &str, receipt: &Confirmation) -> Result<String, String>;
}

/// Steps that stand in for real work by taking a fixed amount of time
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    work_time: Duration,
}

impl SimulatedWork {
    pub fn new(work_time: Duration) -> Self {
        Self { work_time }
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl ProducerSteps for SimulatedWork {
    async fn prepare(&self, workflow_id: &str, input: &str) -> Result<serde_json::Value, String> {
        tokio::time::sleep(self.work_time).await;
        tracing::info!("Completed initial processing for workflow {}", workflow_id);
        Ok(json!({ "workflow_id": workflow_id, "data": input }))
    }

    async fn finalize(&self, workflow_id: &str, receipt: &Confirmation) -> Result<String, String> {
        tokio::time::sleep(self.work_time).await;
        let result = format!(
            "Completed final processing for workflow {} (batch {}, request {})",
            workflow_id, receipt.batch, receipt.request_id
        );
        tracing::info!("{}", result);
        Ok(result)
    }
}
