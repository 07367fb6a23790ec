//! Per-caller quota store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::bucket::TokenBucket;

/// A caller's quota record: its bucket plus the idle-expiry deadline.
struct QuotaEntry {
    bucket: TokenBucket,
    expires_at: Instant,
}

/// Outcome of one admission attempt against the store.
///
/// `available` and `capacity` are snapshotted in the same locked region as
/// the debit, so they always reflect the debit that was actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether a token was debited
    pub admitted: bool,
    /// Tokens left after the attempt
    pub available: u64,
    /// The caller's quota ceiling
    pub capacity: u64,
}

/// Map from caller key to active quota entry.
///
/// This struct is thread-safe and can be shared across multiple tasks. One
/// coarse mutex guards the whole map: lookup-or-insert, debit, expiry
/// refresh, and the reclamation sweep all serialize on it, so request-time
/// entry creation can never race sweep-time deletion. The lock is only ever
/// held for O(1) map work per request or for one bounded sweep pass.
///
/// Entries are created lazily on first use and removed only by the sweep,
/// never synchronously on use.
pub struct QuotaStore {
    entries: Mutex<HashMap<String, QuotaEntry>>,
}

impl QuotaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run one admission attempt for `key` in a single locked region.
    ///
    /// Looks up the caller's entry, installing a fresh full bucket if the key
    /// is absent, or if the existing entry's deadline has lapsed without the
    /// sweep reaching it yet: a caller that sat idle for a full window starts
    /// over rather than inheriting stale partial state. The entry's deadline
    /// is then pushed out to `now + window` whether or not the debit
    /// succeeded, so a rejected caller still hammering away is not reclaimed
    /// mid-burst.
    pub fn admit(
        &self,
        key: &str,
        capacity: u64,
        refill_interval: Duration,
        window: Duration,
    ) -> Admission {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expires_at <= now {
                    trace!(caller = %key, "replacing lapsed quota entry");
                    entry.bucket = TokenBucket::new(refill_interval, capacity);
                }
            })
            .or_insert_with(|| {
                debug!(caller = %key, capacity, "creating quota entry");
                QuotaEntry {
                    bucket: TokenBucket::new(refill_interval, capacity),
                    expires_at: now + window,
                }
            });

        let admitted = entry.bucket.try_debit();
        let available = entry.bucket.available();
        let capacity = entry.bucket.capacity();
        entry.expires_at = now + window;

        Admission {
            admitted,
            available,
            capacity,
        }
    }

    /// Remove entries whose deadline is at or before `now`.
    ///
    /// Stops after `max_removed` removals or once `max_duration` of
    /// wall-clock work has elapsed, whichever comes first, so a store full of
    /// stale entries cannot starve concurrent requesters of the lock.
    /// Entries left behind are picked up by later sweeps. Returns the number
    /// removed.
    pub fn remove_expired(&self, now: Instant, max_removed: usize, max_duration: Duration) -> usize {
        let deadline = Instant::now() + max_duration;
        let mut entries = self.entries.lock();

        let mut stale = Vec::new();
        for (key, entry) in entries.iter() {
            if stale.len() >= max_removed || Instant::now() >= deadline {
                break;
            }
            if entry.expires_at <= now {
                stale.push(key.clone());
            }
        }

        for key in &stale {
            entries.remove(key);
        }

        stale.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether an entry exists for `key`, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl Default for QuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const INTERVAL: Duration = Duration::from_millis(25);
    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_store_starts_empty() {
        let store = QuotaStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_admit_creates_one_entry_per_key() {
        let store = QuotaStore::new();

        store.admit("10.0.0.1", 4, INTERVAL, WINDOW);
        store.admit("10.0.0.1", 4, INTERVAL, WINDOW);
        store.admit("10.0.0.2", 4, INTERVAL, WINDOW);

        assert_eq!(store.len(), 2);
        assert!(store.contains("10.0.0.1"));
        assert!(store.contains("10.0.0.2"));
    }

    #[test]
    fn test_debits_share_the_key_bucket() {
        let store = QuotaStore::new();

        let first = store.admit("10.0.0.1", 3, INTERVAL, WINDOW);
        assert!(first.admitted);
        assert_eq!(first.available, 2);
        assert_eq!(first.capacity, 3);

        let second = store.admit("10.0.0.1", 3, INTERVAL, WINDOW);
        assert!(second.admitted);
        assert_eq!(second.available, 1);
    }

    #[test]
    fn test_keys_do_not_share_quota() {
        let store = QuotaStore::new();

        // Exhaust one caller entirely.
        for _ in 0..2 {
            assert!(store.admit("10.0.0.1", 2, INTERVAL, WINDOW).admitted);
        }
        assert!(!store.admit("10.0.0.1", 2, INTERVAL, WINDOW).admitted);

        // A different caller is unaffected.
        let other = store.admit("10.0.0.2", 2, INTERVAL, WINDOW);
        assert!(other.admitted);
        assert_eq!(other.available, 1);
    }

    #[test]
    fn test_lapsed_entry_is_replaced_not_reused() {
        let store = QuotaStore::new();
        // Refill far slower than the window so a fresh admission can only
        // come from entry replacement.
        let slow = Duration::from_secs(600);

        assert!(store.admit("10.0.0.1", 1, slow, WINDOW).admitted);
        assert!(!store.admit("10.0.0.1", 1, slow, WINDOW).admitted);

        sleep(WINDOW + Duration::from_millis(10));

        let after = store.admit("10.0.0.1", 1, slow, WINDOW);
        assert!(after.admitted);
        assert_eq!(after.available, 0);
    }

    #[test]
    fn test_use_refreshes_the_deadline() {
        let store = QuotaStore::new();

        // Keep touching the entry at a cadence well inside the window.
        for _ in 0..6 {
            store.admit("10.0.0.1", 100, INTERVAL, WINDOW);
            sleep(Duration::from_millis(30));
        }

        // 180ms have passed, far beyond one window, but the entry is live.
        assert_eq!(store.remove_expired(Instant::now(), 1000, Duration::from_secs(1)), 0);
        assert!(store.contains("10.0.0.1"));
    }

    #[test]
    fn test_sweep_removes_only_lapsed_entries() {
        let store = QuotaStore::new();

        store.admit("stale", 4, INTERVAL, Duration::from_millis(10));
        sleep(Duration::from_millis(20));
        store.admit("fresh", 4, INTERVAL, WINDOW);

        let removed = store.remove_expired(Instant::now(), 1000, Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert!(!store.contains("stale"));
        assert!(store.contains("fresh"));
    }

    #[test]
    fn test_sweep_is_bounded_per_cycle() {
        let store = QuotaStore::new();

        for i in 0..5 {
            store.admit(&format!("10.0.0.{i}"), 4, INTERVAL, Duration::from_millis(10));
        }
        sleep(Duration::from_millis(20));

        let removed = store.remove_expired(Instant::now(), 2, Duration::from_secs(1));
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 3);

        // The next cycle drains the rest.
        let removed = store.remove_expired(Instant::now(), 1000, Duration::from_secs(1));
        assert_eq!(removed, 3);
        assert!(store.is_empty());
    }
}
