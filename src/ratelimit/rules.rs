//! Rate limit and quota ceilings.
//!
//! A ceiling of zero disables its dimension. Ceilings are read once at
//! construction; quota ceilings can also be changed at runtime through
//! [`QuotaManager::set_quota`](super::QuotaManager::set_quota).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::key::Dimension;
use super::window::TimeWindow;
use crate::error::{Result, SmsError};

/// Daily ceiling applied to a business id with no configured quota.
pub const DEFAULT_QUOTA_PER_DAY: u32 = 3;

/// Per-dimension request ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Sends per phone number per minute
    #[serde(default = "default_phone_per_minute")]
    pub phone_per_minute: u32,
    /// Sends per phone number per hour
    #[serde(default = "default_phone_per_hour")]
    pub phone_per_hour: u32,
    /// Sends per phone number per day
    #[serde(default = "default_phone_per_day")]
    pub phone_per_day: u32,
    /// Sends per device per day
    #[serde(default = "default_daily")]
    pub device_per_day: u32,
    /// Sends per origin IP per day
    #[serde(default = "default_daily")]
    pub ip_per_day: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            phone_per_minute: default_phone_per_minute(),
            phone_per_hour: default_phone_per_hour(),
            phone_per_day: default_phone_per_day(),
            device_per_day: default_daily(),
            ip_per_day: default_daily(),
        }
    }
}

fn default_phone_per_minute() -> u32 {
    1
}

fn default_phone_per_hour() -> u32 {
    3
}

fn default_phone_per_day() -> u32 {
    10
}

fn default_daily() -> u32 {
    10
}

impl LimiterConfig {
    /// A configuration with every dimension disabled.
    pub fn unlimited() -> Self {
        Self {
            phone_per_minute: 0,
            phone_per_hour: 0,
            phone_per_day: 0,
            device_per_day: 0,
            ip_per_day: 0,
        }
    }

    /// Load ceilings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SmsError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// The ceiling for one dimension and window, `None` when disabled or
    /// not applicable. Device and IP dimensions only have a day window.
    pub fn ceiling(&self, dimension: Dimension, window: TimeWindow) -> Option<u32> {
        let ceiling = match (dimension, window) {
            (Dimension::Phone, TimeWindow::Minute) => self.phone_per_minute,
            (Dimension::Phone, TimeWindow::Hour) => self.phone_per_hour,
            (Dimension::Phone, TimeWindow::Day) => self.phone_per_day,
            (Dimension::Device, TimeWindow::Day) => self.device_per_day,
            (Dimension::Ip, TimeWindow::Day) => self.ip_per_day,
            _ => 0,
        };
        (ceiling > 0).then_some(ceiling)
    }
}

/// Business id to ceiling overrides, installed at construction.
pub type QuotaTable = HashMap<String, u32>;
