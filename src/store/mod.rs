//! Shared counter store.
//!
//! The store is the only state shared between clients: rate-limit and quota
//! counters and stored verification codes all live here. Every mutation is a
//! single atomic store operation; nothing above this layer takes locks.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SmsError};

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Namespace shared by every key smsgate writes.
pub const KEY_PREFIX: &str = "sms";

/// One INCR followed by an EXPIRE on the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrExpire {
    pub key: String,
    pub ttl: Duration,
}

/// A pipelined group of increments submitted together.
///
/// The batch saves round trips; it is not atomic across keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<IncrExpire>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.push(key, ttl);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, ttl: Duration) {
        self.ops.push(IncrExpire {
            key: key.into(),
            ttl,
        });
    }

    pub fn ops(&self) -> &[IncrExpire] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Atomic-increment key-value store with per-key time-to-live.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Increment a counter, creating it at zero, and return the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// (Re)set a key's time-to-live.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Run every INCR+EXPIRE pair in `batch` as one submission.
    async fn exec_batch(&self, batch: Batch) -> Result<()>;

    /// Read a counter; absent keys count as zero.
    async fn get_count(&self, key: &str) -> Result<i64> {
        match self.get(key).await? {
            Some(raw) => raw
                .parse()
                .map_err(|_| SmsError::Store(format!("value at {} is not an integer", key))),
            None => Ok(0),
        }
    }
}

/// Key of a stored verification code.
pub fn code_key(biz_id: &str, phone: &str) -> String {
    format!("{}:code:{}:{}", KEY_PREFIX, biz_id, phone)
}

/// Key of a business's quota counter for one calendar day (`YYYYMMDD`).
pub fn quota_key(biz_id: &str, day: &str) -> String {
    format!("{}:quota:{}:{}", KEY_PREFIX, biz_id, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(code_key("login", "13800000000"), "sms:code:login:13800000000");
        assert_eq!(quota_key("login", "20241208"), "sms:quota:login:20241208");
    }

    #[test]
    fn test_batch_builder() {
        let batch = Batch::new()
            .incr_expire("a", Duration::from_secs(60))
            .incr_expire("b", Duration::from_secs(3600));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[1].key, "b");
        assert!(Batch::new().is_empty());
    }

    #[tokio::test]
    async fn test_get_count_parses_and_defaults() {
        let store = MemoryStore::new();
        assert_eq!(store.get_count("missing").await.unwrap(), 0);

        store.incr("n").await.unwrap();
        store.incr("n").await.unwrap();
        assert_eq!(store.get_count("n").await.unwrap(), 2);

        store.set("text", "abc", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(store.get_count("text").await, Err(SmsError::Store(_))));
    }
}
