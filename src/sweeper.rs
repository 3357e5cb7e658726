use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;

/// Run the lifecycle sweep on a fixed interval. The first sweep runs immediately.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match engine.run_daily_lifecycle_sweep().await {
            Ok(report) if report.total() > 0 => info!("sweeper: {} reservations aged", report.total()),
            Ok(_) => {}
            Err(e) => error!("sweeper: {e}"),
        }
    }
}

/// Compact the journal whenever enough appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        debug!("compactor: {appends} appends since last compaction");
        if let Err(e) = engine.compact_wal().await {
            error!("compactor: {e}");
        }
    }
}
