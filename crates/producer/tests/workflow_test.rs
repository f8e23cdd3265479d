use async_trait::async_trait;
use proven_batcher::testing::RecordingWriter;
use proven_batcher::{BatcherConfig, BatcherHost};
use proven_common::subjects;
use proven_common::{Confirmation, FailureReason, RequestId, WriteOutcome, WriteRequest};
use proven_engine::{Message, MockClient, MockEngine, RetryPolicy};
use proven_producer::{
    ProducerConfig, ProducerError, ProducerPhase, ProducerSteps, ProducerWorkflow, WRITE_OPERATION,
};
use proven_snapshot_memory::MemoryCheckpointStore;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const AGGREGATOR: &str = "main";

/// Steps that count their calls and can be told to fail
#[derive(Default)]
struct CountingSteps {
    prepare_calls: AtomicU32,
    finalize_calls: AtomicU32,
    prepare_failures: AtomicU32,
}

#[async_trait]
impl ProducerSteps for CountingSteps {
    async fn prepare(&self, workflow_id: &str, input: &str) -> Result<serde_json::Value, String> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.prepare_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.prepare_failures.store(remaining - 1, Ordering::SeqCst);
            return Err("ledger lookup failed".into());
        }
        Ok(json!({ "workflow_id": workflow_id, "data": input }))
    }

    async fn finalize(&self, workflow_id: &str, receipt: &Confirmation) -> Result<String, String> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} done in batch {}", workflow_id, receipt.batch))
    }
}

fn new_client(engine: &Arc<MockEngine>, name: &str) -> Arc<MockClient> {
    Arc::new(MockClient::new(name.to_string(), engine.clone()))
}

async fn start_batcher(
    engine: &Arc<MockEngine>,
    writer: Arc<RecordingWriter>,
    config: BatcherConfig,
) -> BatcherHost {
    BatcherHost::start_or_resume(
        AGGREGATOR,
        new_client(engine, "batcher"),
        writer,
        Arc::new(MemoryCheckpointStore::new()),
        config,
    )
    .await
    .unwrap()
}

fn producer(
    engine: &Arc<MockEngine>,
    workflow_id: &str,
    steps: Arc<CountingSteps>,
    config: ProducerConfig,
) -> ProducerWorkflow {
    ProducerWorkflow::new(
        workflow_id,
        AGGREGATOR,
        new_client(engine, workflow_id),
        steps,
        config,
    )
}

#[tokio::test(start_paused = true)]
async fn test_workflow_completes_after_confirmation() {
    let engine = Arc::new(MockEngine::new());
    let writer = Arc::new(RecordingWriter::new());
    let host = start_batcher(&engine, writer.clone(), BatcherConfig::default()).await;
    let steps = Arc::new(CountingSteps::default());

    let receipt = producer(&engine, "wf-1", steps.clone(), ProducerConfig::default())
        .spawn("business-data-1")
        .result()
        .await
        .unwrap();

    assert_eq!(receipt.workflow_id, "wf-1");
    assert_eq!(receipt.request_id, RequestId::derive("wf-1", WRITE_OPERATION));
    assert_eq!(receipt.prepared["data"], "business-data-1");
    assert_eq!(receipt.finalized, "wf-1 done in batch 1");
    assert_eq!(steps.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(writer.written(), vec![receipt.request_id.clone()]);

    host.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_producers_share_one_batch() {
    let engine = Arc::new(MockEngine::new());
    let writer = Arc::new(RecordingWriter::new());
    let host = start_batcher(&engine, writer.clone(), BatcherConfig::default()).await;
    let steps = Arc::new(CountingSteps::default());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            producer(&engine, &format!("wf-{}", i), steps.clone(), ProducerConfig::default())
                .spawn(format!("business-data-{}", i))
        })
        .collect();

    for handle in handles {
        handle.result().await.unwrap();
    }

    let batches = writer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 5);

    host.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rerun_of_same_workflow_is_written_once() {
    let engine = Arc::new(MockEngine::new());
    let writer = Arc::new(RecordingWriter::new());
    let host = start_batcher(&engine, writer.clone(), BatcherConfig::default()).await;
    let steps = Arc::new(CountingSteps::default());

    let first = producer(&engine, "wf-1", steps.clone(), ProducerConfig::default()).spawn("data");
    let second = producer(&engine, "wf-1", steps.clone(), ProducerConfig::default()).spawn("data");

    let a = first.result().await.unwrap();
    let b = second.result().await.unwrap();
    assert_eq!(a.request_id, b.request_id);
    assert_eq!(writer.written(), vec![a.request_id]);

    let stats = host.stats_client().get_stats().await.unwrap();
    assert_eq!(stats.duplicates_absorbed, 1);

    host.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_writer_failure_fails_workflow_without_finalizing() {
    let engine = Arc::new(MockEngine::new());
    let writer = Arc::new(RecordingWriter::new());
    writer.set_unavailable(true);
    let host = start_batcher(&engine, writer, BatcherConfig::default()).await;
    let steps = Arc::new(CountingSteps::default());

    let result = producer(&engine, "wf-1", steps.clone(), ProducerConfig::default())
        .spawn("data")
        .result()
        .await;

    match result {
        Err(ProducerError::WriteFailed { request_id, reason }) => {
            assert_eq!(request_id, RequestId::derive("wf-1", WRITE_OPERATION));
            assert_eq!(reason, FailureReason::WriterUnavailable);
        }
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert_eq!(steps.finalize_calls.load(Ordering::SeqCst), 0);

    host.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_carries_reason() {
    let engine = Arc::new(MockEngine::new());
    let writer = Arc::new(RecordingWriter::new());
    writer.reject(RequestId::derive("wf-1", WRITE_OPERATION), "account frozen");
    let host = start_batcher(&engine, writer, BatcherConfig::default()).await;

    let result = producer(
        &engine,
        "wf-1",
        Arc::new(CountingSteps::default()),
        ProducerConfig::default(),
    )
    .spawn("data")
    .result()
    .await;

    assert!(matches!(
        result,
        Err(ProducerError::WriteFailed { reason: FailureReason::Rejected(ref r), .. }) if r == "account frozen"
    ));

    host.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout() {
    let engine = Arc::new(MockEngine::new());
    // Inbox exists but nobody consumes it
    engine
        .ensure_stream(&subjects::inbox_stream(AGGREGATOR))
        .unwrap();

    let start = Instant::now();
    let result = producer(
        &engine,
        "wf-1",
        Arc::new(CountingSteps::default()),
        ProducerConfig::default(),
    )
    .spawn("data")
    .result()
    .await;

    match result {
        Err(ProducerError::ConfirmationTimeout { request_id, waited }) => {
            assert_eq!(request_id, RequestId::derive("wf-1", WRITE_OPERATION));
            assert_eq!(waited, Duration::from_secs(120));
        }
        other => panic!("expected ConfirmationTimeout, got {:?}", other),
    }
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert!(start.elapsed() < Duration::from_secs(130));
}

#[tokio::test(start_paused = true)]
async fn test_submission_error_after_retries() {
    let engine = Arc::new(MockEngine::new());
    let steps = Arc::new(CountingSteps::default());

    // No inbox: the aggregator was never started
    let result = producer(&engine, "wf-1", steps, ProducerConfig::default())
        .spawn("data")
        .result()
        .await;

    match result {
        Err(ProducerError::Submission { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Submission, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_preparation_is_retried_then_fails() {
    let engine = Arc::new(MockEngine::new());
    engine
        .ensure_stream(&subjects::inbox_stream(AGGREGATOR))
        .unwrap();

    let steps = Arc::new(CountingSteps::default());
    steps.prepare_failures.store(10, Ordering::SeqCst);

    let config = ProducerConfig::default().with_step_retry(RetryPolicy::default());
    let result = producer(&engine, "wf-1", steps.clone(), config)
        .spawn("data")
        .result()
        .await;

    assert!(matches!(result, Err(ProducerError::Preparation(_))));
    assert_eq!(steps.prepare_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        engine
            .streams()
            .stream_len(&subjects::inbox_stream(AGGREGATOR))
            .unwrap(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_foreign_and_late_confirmations_are_ignored() {
    let engine = Arc::new(MockEngine::new());
    let inbox = subjects::inbox_stream(AGGREGATOR);
    engine.ensure_stream(&inbox).unwrap();
    let mut submits = engine.stream_messages(&inbox, None).unwrap();

    let handle = producer(
        &engine,
        "wf-1",
        Arc::new(CountingSteps::default()),
        ProducerConfig::default(),
    )
    .spawn("data");

    // Act as the aggregator
    let (message, _, _) = submits.recv().await.unwrap();
    let request = WriteRequest::decode(&message.body).unwrap();
    assert_eq!(handle.status().phase, ProducerPhase::AwaitingConfirmation);

    let subject = subjects::confirm_subject("wf-1");
    let confirm = |request_id: RequestId, outcome: WriteOutcome| {
        let confirmation = Confirmation {
            request_id,
            outcome,
            batch: 1,
            batch_size: 1,
        };
        engine.deliver(&subject, Message::confirmation(&confirmation).unwrap())
    };

    confirm(RequestId::from("wr-someone-else"), WriteOutcome::rejected("nope")).unwrap();
    confirm(request.request_id.clone(), WriteOutcome::Success).unwrap();

    let receipt = handle.result().await.unwrap();
    assert_eq!(receipt.request_id, request.request_id);

    // The mailbox is closed once the workflow is done
    assert!(confirm(request.request_id, WriteOutcome::rejected("late")).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_wait_deadline() {
    let engine = Arc::new(MockEngine::new());
    engine
        .ensure_stream(&subjects::inbox_stream(AGGREGATOR))
        .unwrap();

    let handle = producer(
        &engine,
        "wf-1",
        Arc::new(CountingSteps::default()),
        ProducerConfig::default().with_confirmation_timeout(Duration::from_secs(60)),
    )
    .spawn("data");

    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = handle.status();
    assert_eq!(status.workflow_id, "wf-1");
    assert_eq!(status.phase, ProducerPhase::AwaitingConfirmation);
    assert_eq!(
        status.request_id,
        Some(RequestId::derive("wf-1", WRITE_OPERATION))
    );
    let remaining = status.deadline_remaining.unwrap();
    assert!(remaining <= Duration::from_secs(50));
    assert!(remaining > Duration::from_secs(40));

    assert!(handle.result().await.is_err());
}
