//! Nanosecond-precision timestamp type
//!
//! Log entries carry the time they were produced. WAL records delta-encode
//! timestamps against the first entry in the record, so the representation
//! is a signed nanosecond count.
//!
//! ## Precision
//!
//! Timestamps are stored as nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
//! An `i64` covers roughly the years 1678 to 2262.
//!
//! ## Usage
//!
//! ```
//! use tidelog_core::Timestamp;
//!
//! let now = Timestamp::now();
//! let from_secs = Timestamp::from_secs(1000);
//! let from_nanos = Timestamp::from_nanos(1_000_000_000);
//! assert!(now > from_secs);
//! assert_eq!(from_nanos.as_secs(), 1);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanosecond-precision timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a timestamp for the current moment
    ///
    /// Returns epoch if the system clock is before Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    /// Create a timestamp from nanoseconds since epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    /// Create a timestamp from milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    /// Create a timestamp from seconds since epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000_000))
    }

    /// Convert from a chrono UTC datetime
    ///
    /// Returns `None` if the datetime is outside the representable range.
    pub fn from_datetime(dt: DateTime<Utc>) -> Option<Self> {
        dt.timestamp_nanos_opt().map(Timestamp)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get nanoseconds since Unix epoch
    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Get seconds since Unix epoch (truncates toward zero)
    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Convert to a chrono UTC datetime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }

    /// Compute duration since an earlier timestamp
    ///
    /// Returns `None` if `earlier` is actually later than `self`.
    pub fn duration_since(&self, earlier: Timestamp) -> Option<Duration> {
        if self.0 >= earlier.0 {
            Some(Duration::from_nanos((self.0 - earlier.0) as u64))
        } else {
            None
        }
    }

    /// Add a duration, saturating at the maximum representable value
    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Self {
        Timestamp(nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_agree() {
        assert_eq!(Timestamp::from_secs(2), Timestamp::from_millis(2_000));
        assert_eq!(Timestamp::from_millis(2), Timestamp::from_nanos(2_000_000));
    }

    #[test]
    fn test_now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::EPOCH);
    }

    #[test]
    fn test_negative_timestamps_order_before_epoch() {
        let before = Timestamp::from_nanos(-5);
        assert!(before < Timestamp::EPOCH);
        assert_eq!(before.duration_since(Timestamp::EPOCH), None);
    }

    #[test]
    fn test_duration_since() {
        let a = Timestamp::from_secs(10);
        let b = Timestamp::from_secs(12);
        assert_eq!(b.duration_since(a), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_saturating_add() {
        let max = Timestamp::from_nanos(i64::MAX - 1);
        assert_eq!(
            max.saturating_add(Duration::from_secs(1)),
            Timestamp::from_nanos(i64::MAX)
        );
    }

    #[test]
    fn test_datetime_round_trip() {
        let ts = Timestamp::from_nanos(1_700_000_000_123_456_789);
        let dt = ts.to_datetime();
        assert_eq!(Timestamp::from_datetime(dt), Some(ts));
    }

    #[test]
    fn test_display_is_rfc3339() {
        let ts = Timestamp::from_secs(0);
        assert!(ts.to_string().starts_with("1970-01-01T00:00:00"));
    }
}
