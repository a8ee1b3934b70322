//! Rate limiting and business quota enforcement.

mod key;
mod limiter;
mod quota;
mod rules;
mod window;

pub use key::{CounterKey, Dimension};
pub use limiter::RateLimiter;
pub use quota::QuotaManager;
pub use rules::{LimiterConfig, QuotaTable, DEFAULT_QUOTA_PER_DAY};
pub use window::TimeWindow;
