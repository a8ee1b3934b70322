//! Multi-dimensional send rate limiter.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, trace};

use super::key::{CounterKey, Dimension};
use super::rules::LimiterConfig;
use super::window::TimeWindow;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SmsError};
use crate::message::SendRequest;
use crate::store::{Batch, CounterStore};

/// Phone windows in the order they are checked.
const PHONE_WINDOWS: [TimeWindow; 3] = [TimeWindow::Minute, TimeWindow::Hour, TimeWindow::Day];

/// Enforces per-phone, per-device and per-IP ceilings on the shared store.
///
/// Checks and increments are separate store operations. Two concurrent
/// requests in the same bucket can both pass the check before either
/// increments, so a ceiling may be overshot slightly under contention.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter; `None` uses [`LimiterConfig::default`].
    pub fn new(store: Arc<dyn CounterStore>, config: Option<LimiterConfig>) -> Self {
        Self {
            store,
            config: config.unwrap_or_default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to pick window buckets.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Every enabled counter that applies to `req`, in check order.
    fn counters_for(&self, req: &SendRequest, now: &DateTime<Local>) -> Vec<(CounterKey, u32)> {
        let mut counters = Vec::with_capacity(5);

        for window in PHONE_WINDOWS {
            if let Some(ceiling) = self.config.ceiling(Dimension::Phone, window) {
                counters.push((CounterKey::new(Dimension::Phone, window, &req.phone, now), ceiling));
            }
        }

        let optional = [
            (Dimension::Device, req.device()),
            (Dimension::Ip, req.origin_ip()),
        ];
        for (dimension, id) in optional {
            let Some(id) = id else { continue };
            if let Some(ceiling) = self.config.ceiling(dimension, TimeWindow::Day) {
                counters.push((CounterKey::new(dimension, TimeWindow::Day, id, now), ceiling));
            }
        }

        counters
    }

    /// Check every enabled ceiling for `req` and, only if all pass, count it.
    ///
    /// Fails on the first ceiling already reached without incrementing
    /// anything. The increments for one request go out as one pipelined
    /// batch, each (re)setting its key's expiry to the window length.
    pub async fn check_and_increment(&self, req: &SendRequest) -> Result<()> {
        let now = self.clock.now();
        let counters = self.counters_for(req, &now);

        for (key, ceiling) in &counters {
            let store_key = key.to_store_key();
            let count = self.store.get_count(&store_key).await?;

            trace!(key = %store_key, count, limit = ceiling, "Checking rate limit");

            if count >= i64::from(*ceiling) {
                debug!(
                    key = %store_key,
                    count,
                    limit = ceiling,
                    "Rate limit exceeded"
                );
                return Err(limit_error(key.dimension));
            }
        }

        let mut batch = Batch::new();
        for (key, _) in &counters {
            batch.push(key.to_store_key(), key.window.duration());
        }
        if !batch.is_empty() {
            self.store.exec_batch(batch).await?;
        }

        Ok(())
    }

    /// Current count for `phone` in the named window (`minute`, `hour` or
    /// `day`). Read-only.
    pub async fn get_phone_count(&self, phone: &str, window: &str) -> Result<u64> {
        let window: TimeWindow = window.parse()?;
        let key = CounterKey::new(Dimension::Phone, window, phone, &self.clock.now());
        let count = self.store.get_count(&key.to_store_key()).await?;
        Ok(count.max(0) as u64)
    }
}

fn limit_error(dimension: Dimension) -> SmsError {
    match dimension {
        Dimension::Phone => SmsError::PhoneRateLimit,
        Dimension::Device => SmsError::DeviceRateLimit,
        Dimension::Ip => SmsError::IpRateLimit,
    }
}
