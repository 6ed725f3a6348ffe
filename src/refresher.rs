use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::{now_ms, Engine};

/// Background task that keeps every resource's derived status current as
/// stays begin and end.
pub async fn run_status_refresher(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let changed = engine.refresh_statuses(now_ms()).await;
        if changed > 0 {
            debug!(changed, "resource statuses refreshed");
        }
    }
}

/// Background task that compacts the journal once enough records accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.journal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_journal().await {
            error!("journal compaction failed: {e}");
        }
    }
}
