//! # Timestamp Conversions
//!
//! The wire format and the storage columns carry timestamps as integer
//! milliseconds since the Unix epoch; Rust code works with
//! `chrono::DateTime<Utc>`. These helpers convert at the boundary.

use chrono::{DateTime, TimeZone, Utc};

/// Converts a timestamp to integer epoch milliseconds.
#[inline]
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Converts integer epoch milliseconds back to a timestamp.
///
/// Returns `None` for values outside chrono's representable range.
#[inline]
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Converts an optional timestamp to optional epoch milliseconds.
#[inline]
pub fn to_millis_opt(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(to_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let back = from_millis(to_millis(now)).unwrap();
        // chrono keeps sub-millisecond precision; the round trip truncates
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_from_millis_epoch() {
        let ts = from_millis(0).unwrap();
        assert_eq!(ts.timestamp(), 0);
    }
}
