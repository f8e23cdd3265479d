//! Periodic health reporting for an aggregator

use crate::stats::StatsClient;
use proven_common::subjects;
use proven_engine::MockClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Start the health monitor task.
///
/// Every `interval` the aggregator's stats are queried, logged and published
/// on its health subject. A failed query is logged and the loop keeps going.
pub fn spawn(
    client: Arc<MockClient>,
    aggregator_id: impl Into<String>,
    interval: Duration,
) -> JoinHandle<()> {
    let stats = StatsClient::new(client.clone(), aggregator_id);

    tokio::spawn(async move {
        let health_subject = subjects::health_subject(stats.aggregator_id());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let current = match stats.get_stats().await {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!("[{}] Failed to query stats: {}", stats.aggregator_id(), e);
                    continue;
                }
            };

            tracing::info!(
                "[{}] Pending writes: {}, processed batches: {}, signals: {}/{}, restarts: {}, duplicates: {}",
                stats.aggregator_id(),
                current.pending_writes,
                current.processed_batches,
                current.total_signals_received,
                current.checkpoint_signal_threshold,
                current.restarts,
                current.duplicates_absorbed
            );

            match current.to_message() {
                Ok(message) => {
                    if let Err(e) = client.publish(&health_subject, vec![message]).await {
                        tracing::debug!("Failed to publish health: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to encode health: {}", e),
            }
        }
    })
}
