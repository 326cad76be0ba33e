//! Storage for rate-limit window counters.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Counter store failure. The limiter admits the request when it sees one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// A live counter as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    pub key: String,
    pub count: u64,
    pub expires_at: Instant,
}

/// Count within the window that `increment` landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub window_start: Instant,
}

/// Backing store for fixed-window counters.
///
/// Each key owns one window, opened by the first request that sees it.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to `key` inside its current window. A missing counter, or one
    /// whose window ended at or before `now`, restarts at 1 with its window
    /// opening at `now`.
    async fn increment(
        &self,
        key: &str,
        now: Instant,
        window: Duration,
    ) -> Result<WindowCount, RateLimitStoreError>;

    /// Counters that have not expired at `now`.
    async fn counters(&self, now: Instant) -> Result<Vec<CounterEntry>, RateLimitStoreError>;

    /// Drop expired counters, returning the removed keys.
    async fn purge_expired(&self, now: Instant) -> Result<Vec<String>, RateLimitStoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    window_start: Instant,
    expires_at: Instant,
}

/// In-process store on a sharded map.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        now: Instant,
        window: Duration,
    ) -> Result<WindowCount, RateLimitStoreError> {
        let fresh = Slot {
            count: 0,
            window_start: now,
            expires_at: now + window,
        };
        let mut slot = self.counters.entry(key.to_string()).or_insert(fresh);
        if slot.expires_at <= now {
            *slot = fresh;
        }
        slot.count += 1;
        Ok(WindowCount {
            count: slot.count,
            window_start: slot.window_start,
        })
    }

    async fn counters(&self, now: Instant) -> Result<Vec<CounterEntry>, RateLimitStoreError> {
        Ok(self
            .counters
            .iter()
            .filter(|e| e.value().expires_at > now)
            .map(|e| CounterEntry {
                key: e.key().clone(),
                count: e.value().count,
                expires_at: e.value().expires_at,
            })
            .collect())
    }

    async fn purge_expired(&self, now: Instant) -> Result<Vec<String>, RateLimitStoreError> {
        let expired: Vec<String> = self
            .counters
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.counters.remove(key);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_and_expires() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();
        let second = Duration::from_secs(1);

        assert_eq!(store.increment("a", now, second).await.unwrap().count, 1);
        assert_eq!(store.increment("a", now, second).await.unwrap().count, 2);
        assert_eq!(store.increment("b", now, Duration::ZERO).await.unwrap().count, 1);

        let live = store.counters(now).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].count, 2);

        assert_eq!(store.purge_expired(now).await.unwrap(), vec!["b".to_string()]);
        assert_eq!(store.len(), 1);
        store.purge_expired(now + second).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn window_opens_at_first_increment_and_restarts_after_it_ends() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        let window = Duration::from_millis(1_000);

        let first = store.increment("k", t0 + Duration::from_millis(900), window).await.unwrap();
        assert_eq!(first.window_start, t0 + Duration::from_millis(900));

        let inside = store.increment("k", t0 + Duration::from_millis(1_800), window).await.unwrap();
        assert_eq!(inside.count, 2);
        assert_eq!(inside.window_start, first.window_start);

        let after = store.increment("k", t0 + Duration::from_millis(1_900), window).await.unwrap();
        assert_eq!(after.count, 1);
        assert_eq!(after.window_start, t0 + Duration::from_millis(1_900));
    }
}
