use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically materializes booking expiration.
/// Reads also sweep on demand; this keeps state fresh between requests.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        match engine.sweep_expired().await {
            Ok(0) => {}
            Ok(n) => info!("swept {n} expired bookings"),
            Err(e) => tracing::warn!("expiration sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compaction().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
