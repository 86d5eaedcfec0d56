//! Background liveness monitor.
//!
//! Simpler than this repo's general `HealthCheck` trait machinery: the
//! orchestrator only needs a periodic "I'm alive" heartbeat that never
//! mutates state and whose absence must never stall the event loop.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Liveness {
    pub last_beat: DateTime<Utc>,
    pub beats: u64,
}

pub struct HealthMonitor {
    state: Arc<RwLock<Liveness>>,
}

impl HealthMonitor {
    pub fn start(interval_secs: u64) -> Self {
        let state = Arc::new(RwLock::new(Liveness {
            last_beat: Utc::now(),
            beats: 0,
        }));
        let loop_state = state.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                let mut guard = loop_state.write().await;
                guard.last_beat = Utc::now();
                guard.beats += 1;
                debug!(beats = guard.beats, "health monitor heartbeat");
            }
        });
        Self { state }
    }

    pub async fn liveness(&self) -> Liveness {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeats_accumulate() {
        let monitor = HealthMonitor::start(1);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let live = monitor.liveness().await;
        assert!(live.beats >= 1);
    }
}
