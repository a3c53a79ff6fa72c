use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::InMemoryStore;

/// Periodically hard-deletes expired cart holds. Runs until the task is dropped.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match engine.cleanup_expired_reservations().await {
            Ok(0) => debug!("reaper: nothing expired"),
            Ok(n) => info!("reaper: purged {n} expired hold(s)"),
            // transient store failures are retried on the next tick
            Err(e) => warn!("reaper sweep failed: {e}"),
        }
    }
}

/// Rewrites the store's log once enough records have piled up since the last rewrite.
pub async fn run_compactor(store: Arc<InMemoryStore>, every: Duration, threshold: u64) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

async fn compact_if_due(store: &InMemoryStore, threshold: u64) -> bool {
    let pending = store.appends_since_compact().await;
    if pending < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted log after {pending} appends");
            true
        }
        Err(e) => {
            warn!("log compaction failed: {e}");
            false
        }
    }
}
