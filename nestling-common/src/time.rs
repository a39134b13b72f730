//! Timestamp utilities

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Get current UTC date (calendar date, no time component)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Current Unix epoch time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds back to a UTC timestamp.
///
/// Returns None for values outside chrono's representable range.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
