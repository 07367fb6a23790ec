//! Core admission policy implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::{self, LimitsConfig};
use crate::error::Result;

use super::reclaimer::Reclaimer;
use super::store::QuotaStore;

/// Admission decision for a single request.
///
/// Rejection is a first-class outcome, not an error: a rejected caller is
/// told how long to wait for the next token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The caller's quota ceiling
    pub limit: u64,
    /// Tokens the caller has left
    pub remaining: u64,
    /// How long a rejected caller should wait before retrying
    pub retry_after: Duration,
}

/// The admission policy: per-caller token-bucket quotas over a quota store,
/// with a background reclaimer bounding memory to active callers.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Checks are synchronous and non-blocking: one map operation plus the
/// refill arithmetic. The reclaimer task's lifetime is tied to this value:
/// it is spawned on construction and stopped by [`shutdown`](Self::shutdown)
/// (or aborted on drop).
pub struct RateLimiter {
    store: Arc<QuotaStore>,
    capacity: u64,
    window: Duration,
    refill_interval: Duration,
    shutdown: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter from a configuration section and spawn its
    /// reclaimer. Must be called from within a tokio runtime.
    ///
    /// Fails fast on limits that cannot produce a usable refill interval.
    pub fn new(limits: &LimitsConfig) -> Result<Self> {
        Self::with_limits(limits.capacity, limits.window())
    }

    /// Create a limiter admitting `capacity` requests per caller per
    /// `window`.
    pub fn with_limits(capacity: u64, window: Duration) -> Result<Self> {
        let refill_interval = config::refill_interval(capacity, window)?;

        let store = Arc::new(QuotaStore::new());
        let shutdown = Arc::new(Notify::new());
        let reclaimer = Reclaimer::new(Arc::clone(&store), window, Arc::clone(&shutdown));
        let sweeper = tokio::spawn(reclaimer.run());

        debug!(
            capacity,
            window_ms = window.as_millis() as u64,
            refill_interval_ms = refill_interval.as_millis() as u64,
            "rate limiter started"
        );

        Ok(Self {
            store,
            capacity,
            window,
            refill_interval,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Check admission for one request from `key`.
    ///
    /// Debits the caller's bucket if a token is available and refreshes the
    /// entry's idle deadline either way, so a caller that keeps hammering
    /// after rejection is not reclaimed mid-burst.
    pub fn check(&self, key: &str) -> Decision {
        trace!(caller = %key, "checking admission");

        let outcome = self
            .store
            .admit(key, self.capacity, self.refill_interval, self.window);

        if !outcome.admitted {
            debug!(caller = %key, "quota exhausted, rejecting");
        }

        Decision {
            admitted: outcome.admitted,
            limit: outcome.capacity,
            remaining: outcome.available,
            retry_after: self.refill_interval,
        }
    }

    /// Number of callers currently holding a quota entry.
    pub fn active_callers(&self) -> usize {
        self.store.len()
    }

    /// The configured window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Stop the reclaimer task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "reclaimer task ended abnormally");
            }
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        // A limiter dropped without an explicit shutdown must not leave its
        // sweep task running.
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}
