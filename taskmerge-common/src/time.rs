//! Timestamp utilities

use chrono::{DateTime, Utc};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Absolute distance between two instants in fractional days
pub fn days_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds().unsigned_abs() as f64 / MILLIS_PER_DAY
}
