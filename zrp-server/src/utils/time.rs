//! Time helpers. All timestamps are unix milliseconds (UTC); calendar
//! dates (due dates, expected dates) are `YYYY-MM-DD` strings.

use chrono::{Datelike, Utc};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Current time as unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UTC year, for year-scoped identifier families.
pub fn current_year() -> i32 {
    Utc::now().year()
}

/// Today as `YYYY-MM-DD`.
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Start of the current UTC month as unix milliseconds.
pub fn month_start_millis() -> i64 {
    let now = Utc::now();
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis())
}
