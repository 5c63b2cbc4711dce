//! Time source injected into scoring, ranking, and retention.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by `Utc::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fractional days elapsed from `from` to `to`; negative when `from` is later.
pub(crate) fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let micros = to.signed_duration_since(from).num_microseconds().unwrap_or(i64::MAX);
    micros as f64 / 86_400_000_000.0
}
