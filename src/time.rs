use chrono::{NaiveDate, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Capture date used for financial snapshots when the caller does not pin one.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
