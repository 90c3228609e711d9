use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::session::MemorySessions;

/// Background task that periodically evicts idle sessions.
pub async fn run_session_reaper(sessions: Arc<MemorySessions>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let evicted = sessions.evict_idle(Instant::now());
        if evicted > 0 {
            info!("reaped {evicted} idle sessions, {} live", sessions.len());
        }
    }
}
