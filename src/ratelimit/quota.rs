//! Per-business daily quota.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::rules::{QuotaTable, DEFAULT_QUOTA_PER_DAY};
use super::window::TimeWindow;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SmsError};
use crate::store::{quota_key, Batch, CounterStore};

/// Enforces a daily send ceiling per business id, independent of the
/// rate limiter. Days are calendar days in the server's local time zone.
pub struct QuotaManager {
    store: Arc<dyn CounterStore>,
    /// Business id -> max sends per day
    quotas: RwLock<HashMap<String, u32>>,
    clock: Arc<dyn Clock>,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            quotas: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a manager with an initial override table.
    pub fn with_quotas(store: Arc<dyn CounterStore>, quotas: QuotaTable) -> Self {
        let manager = Self::new(store);
        *manager.quotas.write() = quotas;
        manager
    }

    /// Replace the clock used to pick the day bucket.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install or overwrite the daily ceiling for `biz_id`.
    pub fn set_quota(&self, biz_id: &str, max_per_day: u32) {
        info!(biz_id = %biz_id, max_per_day, "Setting business quota");
        self.quotas.write().insert(biz_id.to_string(), max_per_day);
    }

    /// The ceiling in force for `biz_id`.
    pub fn max_per_day(&self, biz_id: &str) -> u32 {
        self.quotas
            .read()
            .get(biz_id)
            .copied()
            .unwrap_or(DEFAULT_QUOTA_PER_DAY)
    }

    fn today_key(&self, biz_id: &str) -> String {
        quota_key(biz_id, &TimeWindow::Day.bucket(&self.clock.now()))
    }

    /// Count one send against today's quota, failing if it is used up.
    pub async fn check_and_increment(&self, biz_id: &str) -> Result<()> {
        let max = self.max_per_day(biz_id);
        let key = self.today_key(biz_id);

        let count = self.store.get_count(&key).await?;
        if count >= i64::from(max) {
            debug!(biz_id = %biz_id, count, limit = max, "Business quota exceeded");
            return Err(SmsError::QuotaExceeded);
        }

        let batch = Batch::new().incr_expire(key, TimeWindow::Day.duration());
        self.store.exec_batch(batch).await
    }

    /// Today's usage and ceiling for `biz_id` as `(used, max)`. Read-only.
    pub async fn get_quota(&self, biz_id: &str) -> Result<(u64, u32)> {
        let max = self.max_per_day(biz_id);
        let used = self.store.get_count(&self.today_key(biz_id)).await?;
        Ok((used.max(0) as u64, max))
    }

    /// Delete today's counter for `biz_id`.
    pub async fn reset_quota(&self, biz_id: &str) -> Result<()> {
        info!(biz_id = %biz_id, "Resetting business quota");
        self.store.del(&self.today_key(biz_id)).await?;
        Ok(())
    }
}
