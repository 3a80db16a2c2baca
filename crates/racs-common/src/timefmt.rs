//! Timestamp formatting for the S3 wire dialect (§6).
//!
//! The listing/HEAD/GET XML and headers always render `.000Z`
//! literally rather than an object's actual sub-second precision —
//! that is the wire format clients parse against, not an artifact of
//! a particular clock resolution.

use chrono::{DateTime, Utc};

/// Format a unix timestamp (seconds) as `YYYY-MM-DDTHH:MM:SS.000Z`.
#[must_use]
pub fn iso8601_millis(unix_secs: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now);
    format!("{}.000Z", dt.format("%Y-%m-%dT%H:%M:%S"))
}

/// Format a unix timestamp as an RFC 1123 HTTP date for `Last-Modified`.
#[must_use]
pub fn http_date(unix_secs: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now);
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_format_is_literal_millis() {
        // 2024-01-02T03:04:05Z
        let ts = 1_704_165_845;
        assert_eq!(iso8601_millis(ts), "2024-01-02T03:04:05.000Z");
    }

    #[test]
    fn http_date_format() {
        let ts = 1_704_165_845;
        assert_eq!(http_date(ts), "Tue, 02 Jan 2024 03:04:05 GMT");
    }
}
