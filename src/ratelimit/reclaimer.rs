//! Background reclamation of idle quota entries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::store::QuotaStore;

/// Upper bound on entries removed in one sweep cycle.
const MAX_REMOVED_PER_CYCLE: usize = 1000;
/// Upper bound on wall-clock time spent in one sweep pass.
const MAX_SWEEP_DURATION: Duration = Duration::from_secs(1);

/// Periodic task that evicts quota entries idle for a full window.
///
/// Ticks once per window. Each cycle snapshots `now` and runs one bounded
/// sweep pass over the store; whatever the bounds leave behind is removed in
/// later cycles. The task exits when its shutdown handle is notified.
pub(crate) struct Reclaimer {
    store: Arc<QuotaStore>,
    period: Duration,
    shutdown: Arc<Notify>,
}

impl Reclaimer {
    pub(crate) fn new(store: Arc<QuotaStore>, period: Duration, shutdown: Arc<Notify>) -> Self {
        Self {
            store,
            period,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        let mut tick = tokio::time::interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires immediately; the first sweep belongs one full
        // period out.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep(),
                _ = self.shutdown.notified() => {
                    debug!("reclaimer stopping");
                    break;
                }
            }
        }
    }

    fn sweep(&self) {
        let removed =
            self.store
                .remove_expired(Instant::now(), MAX_REMOVED_PER_CYCLE, MAX_SWEEP_DURATION);
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "swept idle quota entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_idle_entries_are_swept_on_tick() {
        let store = Arc::new(QuotaStore::new());
        let shutdown = Arc::new(Notify::new());
        let window = Duration::from_millis(50);

        let reclaimer = Reclaimer::new(Arc::clone(&store), window, Arc::clone(&shutdown));
        let task = tokio::spawn(reclaimer.run());

        store.admit("10.0.0.1", 4, INTERVAL, window);
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_millis(160)).await;
        assert!(store.is_empty());

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_task() {
        let store = Arc::new(QuotaStore::new());
        let shutdown = Arc::new(Notify::new());

        let reclaimer = Reclaimer::new(
            Arc::clone(&store),
            Duration::from_secs(3600),
            Arc::clone(&shutdown),
        );
        let task = tokio::spawn(reclaimer.run());

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reclaimer did not stop after shutdown")
            .unwrap();
    }
}
