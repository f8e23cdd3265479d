//! Runs an aggregator and a handful of producer workflows against it.
//!
//! Usage: `cargo run -p proven-producer --example batch_demo -- [workflows]`
//! Log verbosity follows `RUST_LOG` (default `info`).

use proven_batcher::{BatcherConfig, BatcherHost, LoggingWriter, monitor};
use proven_engine::{MockClient, MockEngine};
use proven_producer::{ProducerConfig, ProducerWorkflow, SimulatedWork};
use proven_snapshot_memory::MemoryCheckpointStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

const AGGREGATOR: &str = "batcher-main";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let workflows: usize = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };
    if workflows == 0 {
        return Err("number of workflows must be at least 1".into());
    }

    let engine = Arc::new(MockEngine::new());
    let client = |name: &str| Arc::new(MockClient::new(name.to_string(), engine.clone()));

    let host = BatcherHost::start_or_resume(
        AGGREGATOR,
        client("batcher"),
        Arc::new(LoggingWriter::default()),
        Arc::new(MemoryCheckpointStore::new()),
        BatcherConfig::default().with_batch_time_threshold(Duration::from_secs(2)),
    )
    .await?;
    let monitor = monitor::spawn(client("monitor"), AGGREGATOR, Duration::from_secs(1));

    let steps = Arc::new(SimulatedWork::new(Duration::from_millis(200)));
    let handles: Vec<_> = (0..workflows)
        .map(|i| {
            let workflow_id = format!("main-workflow-{:03}", i);
            ProducerWorkflow::new(
                workflow_id.clone(),
                AGGREGATOR,
                client(&workflow_id),
                steps.clone(),
                ProducerConfig::default(),
            )
            .spawn(format!("business-data-{}", i))
        })
        .collect();

    for handle in handles {
        let workflow_id = handle.workflow_id().to_string();
        match handle.result().await {
            Ok(receipt) => tracing::info!("{}: {}", workflow_id, receipt.finalized),
            Err(e) => tracing::error!("{}: {}", workflow_id, e),
        }
    }

    monitor.abort();
    let state = host.shutdown().await?;
    tracing::info!(
        "Aggregator stopped after {} batches ({} restarts)",
        state.batches_completed,
        state.restarts
    );
    Ok(())
}
