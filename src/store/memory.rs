//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Batch, CounterStore};
use crate::error::{Result, SmsError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// How often writes sweep the whole map for expired entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A [`CounterStore`] held in process memory.
///
/// Each key is updated under its shard lock, so `incr` is atomic per key.
/// Expired entries read as absent. A read of an expired key removes it, and
/// writes sweep the map at most once per [`PURGE_INTERVAL`], so buckets from
/// past windows do not accumulate. Clones share the same map.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    last_purge: Arc<Mutex<Instant>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            last_purge: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_purge.lock() = now;
        self.purge_at(now)
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep if the last sweep is older than [`PURGE_INTERVAL`].
    /// Must not be called while holding an entry guard.
    fn maybe_purge(&self, now: Instant) {
        {
            let mut last = self.last_purge.lock();
            if now.saturating_duration_since(*last) < PURGE_INTERVAL {
                return;
            }
            *last = now;
        }

        let removed = self.purge_at(now);
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Purged expired counters");
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time-to-live of a key, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.expires_at.map(|at| at - now)
    }

    fn incr_now(&self, key: &str, now: Instant) -> Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| SmsError::Store(format!("value at {} is not an integer", key)))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    fn expire_now(&self, key: &str, ttl: Duration, now: Instant) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = Some(now + ttl);
            }
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.maybe_purge(Instant::now());
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        self.maybe_purge(now);
        self.incr_now(key, now)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.expire_now(key, ttl, Instant::now());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exec_batch(&self, batch: Batch) -> Result<()> {
        let now = Instant::now();
        self.maybe_purge(now);
        for op in batch.ops() {
            let value = self.incr_now(&op.key, now)?;
            self.expire_now(&op.key, op.ttl, now);
            trace!(key = %op.key, value, ttl_secs = op.ttl.as_secs(), "Incremented counter");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_creates_and_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_hides_key() {
        let store = MemoryStore::new();
        store.incr("k").await.unwrap();
        store.expire("k", Duration::from_secs(60)).await.unwrap();
        assert!(store.ttl("k").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);

        // An expired counter restarts from zero.
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_and_purge() {
        let store = MemoryStore::new();
        store.set("code", "123456", Duration::from_secs(300)).await.unwrap();
        assert_eq!(store.get("code").await.unwrap().as_deref(), Some("123456"));
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.is_empty());
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_del_reports_existence() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_increments_and_expires_every_key() {
        let store = MemoryStore::new();
        let batch = Batch::new()
            .incr_expire("a", Duration::from_secs(60))
            .incr_expire("b", Duration::from_secs(3600));
        store.exec_batch(batch).await.unwrap();

        assert_eq!(store.get_count("a").await.unwrap(), 1);
        assert_eq!(store.get_count("b").await.unwrap(), 1);
        assert!(store.ttl("a").unwrap() <= Duration::from_secs(60));
        assert!(store.ttl("b").unwrap() > Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_buckets_are_swept_by_later_writes() {
        let store = MemoryStore::new();
        for minute in 0..1000 {
            let key = format!("counter:{}", minute);
            let batch = Batch::new().incr_expire(key, Duration::from_secs(60));
            store.exec_batch(batch).await.unwrap();
            tokio::time::advance(Duration::from_secs(61)).await;
        }

        // Only the last bucket is left, and it has expired too.
        assert_eq!(store.entries.len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_expired_key_removes_it() {
        let store = MemoryStore::new();
        store.set("code", "123456", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.get("code").await.unwrap(), None);
        assert_eq!(store.entries.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_incr_is_atomic() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.incr("shared").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_count("shared").await.unwrap(), 800);
    }
}
