//! HTTP-date handling for the Last-Modified, If-Modified-Since, and If-Unmodified-Since headers.
//!
//! HTTP-dates have whole-second resolution, while stamps are kept in milliseconds.  Formatting
//! truncates; parsing yields the start of the named second.  Comparisons against a date go
//! through `truncate_to_second` so a stamp equals the Last-Modified date it was rendered as.

use chrono::{DateTime, TimeZone, Utc};

/// The IMF-fixdate layout, e.g. "Sun, 06 Nov 1994 08:49:37 GMT".
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Formats a millisecond timestamp as an HTTP-date.
pub fn format_http_date(millis: i64) -> String {
    let time = Utc
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default();
    time.format(IMF_FIXDATE).to_string()
}

/// Drops the milliseconds from a timestamp, rounding toward the start of its second.
pub fn truncate_to_second(millis: i64) -> i64 {
    millis - millis.rem_euclid(1000)
}

/// Parses an HTTP-date into a millisecond timestamp.  Returns None for anything that isn't a
/// valid date; callers decide what an invalid date means for them.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    // IMF-fixdate is a subset of RFC 2822 (with GMT as an obsolete zone name), so chrono's
    // parser covers the format we emit and the common variants clients send.
    if let Ok(time) = DateTime::parse_from_rfc2822(value) {
        return Some(time.timestamp_millis());
    }
    // Some clients echo our stamps back as RFC 3339.
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.timestamp_millis())
}
