use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

/// Entries older than this many suppression windows are evicted whenever a
/// write happens, so the map stays bounded by recent distinct record ids
/// without a background timer.
const COMPACTION_FACTOR: u32 = 10;

/// Tracks recently-seen record ids so that at-least-once webhook delivery
/// produces at most one notification per record per suppression window.
pub struct DedupCache {
    window: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` when `record_id` was already seen less than one window
    /// before `now` (suppress the event). Otherwise records `now` as the
    /// id's last-seen instant and returns `false`.
    ///
    /// The check and the write happen under a single lock acquisition with
    /// no await points in between, so two near-simultaneous calls for the
    /// same id cannot both observe "not a duplicate".
    pub async fn check_and_mark(&self, record_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;

        if let Some(&last_seen) = entries.get(record_id) {
            if now.saturating_duration_since(last_seen) < self.window {
                return true;
            }
        }

        entries.insert(record_id.to_string(), now);
        entries.retain(|_, &mut last_seen| {
            now.saturating_duration_since(last_seen) <= self.window * COMPACTION_FACTOR
        });
        false
    }

    #[cfg(test)]
    async fn contains(&self, record_id: &str) -> bool {
        self.entries.lock().await.contains_key(record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(5000);

    #[tokio::test]
    async fn first_sight_is_never_a_duplicate() {
        let cache = DedupCache::new(WINDOW);
        assert!(!cache.check_and_mark("42", Instant::now()).await);
    }

    #[tokio::test]
    async fn repeat_within_window_is_suppressed() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("42", t0).await);
        assert!(cache.check_and_mark("42", t0 + Duration::from_millis(200)).await);
        assert!(cache.check_and_mark("42", t0 + Duration::from_millis(4999)).await);
    }

    #[tokio::test]
    async fn repeat_after_window_is_treated_as_new() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("42", t0).await);
        assert!(!cache.check_and_mark("42", t0 + Duration::from_millis(6000)).await);
    }

    #[tokio::test]
    async fn exact_window_boundary_is_not_a_duplicate() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("42", t0).await);
        assert!(!cache.check_and_mark("42", t0 + WINDOW).await);
    }

    #[tokio::test]
    async fn suppression_does_not_refresh_last_seen() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("42", t0).await);
        // A suppressed delivery at t0+4s must not push the window out: the
        // entry still dates from t0, so t0+5s is past it.
        assert!(cache.check_and_mark("42", t0 + Duration::from_millis(4000)).await);
        assert!(!cache.check_and_mark("42", t0 + WINDOW).await);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_interact() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("a", t0).await);
        assert!(!cache.check_and_mark("b", t0 + Duration::from_millis(1)).await);
        assert!(cache.check_and_mark("a", t0 + Duration::from_millis(2)).await);
    }

    #[tokio::test]
    async fn stale_entries_are_compacted_on_write() {
        let cache = DedupCache::new(WINDOW);
        let t0 = Instant::now();
        assert!(!cache.check_and_mark("stale", t0).await);

        // Keep writing other ids once per window; at 11 windows the stale
        // entry's age exceeds the 10x retention bound and gets evicted.
        for step in 1..=11u32 {
            let id = format!("id-{step}");
            assert!(!cache.check_and_mark(&id, t0 + WINDOW * step).await);
        }

        assert!(!cache.contains("stale").await);
        assert!(cache.contains("id-11").await);
    }
}
