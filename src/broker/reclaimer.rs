/// Background expired-lease sweep
///
/// Runs `reclaim_expired` for one topic on a fixed interval until cancelled.
/// It is independent of any consumer, so a message leased by a consumer that
/// crashed or hung is eventually redelivered.

use crate::broker::queue::LeaseQueue;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn spawn_reclaimer(
    queue: LeaseQueue,
    topic: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = queue.reclaim_expired(&topic).await {
                tracing::warn!("⚠️ Lease reclaim failed on {}: {}", topic, e);
            }
        }

        tracing::debug!("🛑 Reclaimer stopped for {}", topic);
    })
}
