//! Counter key generation for limiting dimensions.

use std::fmt;

use chrono::{DateTime, Local};

use super::window::TimeWindow;
use crate::store::KEY_PREFIX;

/// What a rate-limit counter is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Phone,
    Device,
    Ip,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Phone => "phone",
            Dimension::Device => "device",
            Dimension::Ip => "ip",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that uniquely identifies one rate-limit counter.
///
/// Rendered as `sms:limiter:{dimension}:{window}:{id}:{bucket}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub dimension: Dimension,
    pub window: TimeWindow,
    /// The phone number, device id or IP being limited
    pub id: String,
    /// Window bucket the counter belongs to
    pub bucket: String,
}

impl CounterKey {
    /// Key for `id` in the bucket of `window` that contains `now`.
    pub fn new(dimension: Dimension, window: TimeWindow, id: &str, now: &DateTime<Local>) -> Self {
        Self {
            dimension,
            window,
            id: id.to_string(),
            bucket: window.bucket(now),
        }
    }

    /// Convert the key to its store representation.
    pub fn to_store_key(&self) -> String {
        format!(
            "{}:limiter:{}:{}:{}:{}",
            KEY_PREFIX, self.dimension, self.window, self.id, self.bucket
        )
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 12, 8, 10, 30, 15).unwrap()
    }

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new(Dimension::Phone, TimeWindow::Minute, "13800000000", &at());
        assert_eq!(
            key.to_store_key(),
            "sms:limiter:phone:minute:13800000000:202412081030"
        );

        let key = CounterKey::new(Dimension::Ip, TimeWindow::Day, "10.0.0.1", &at());
        assert_eq!(key.to_string(), "sms:limiter:ip:day:10.0.0.1:20241208");
    }

    #[test]
    fn test_counter_key_equality() {
        let key1 = CounterKey::new(Dimension::Device, TimeWindow::Day, "dev-1", &at());
        let key2 = CounterKey::new(Dimension::Device, TimeWindow::Day, "dev-1", &at());
        assert_eq!(key1, key2);

        let other_dimension = CounterKey::new(Dimension::Ip, TimeWindow::Day, "dev-1", &at());
        assert_ne!(key1.to_store_key(), other_dimension.to_store_key());
    }
}
