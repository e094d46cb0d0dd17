//! Wall clock timestamps for execution records.
//!
//! Timestamps are metadata and age keys for eviction. Durations are
//! measured with `std::time::Duration`.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub seconds: u64,
    /// Sub-second nanoseconds
    pub nanos: u32,
}

impl Timestamp {
    /// Maximum nanoseconds per second
    pub const NANOS_PER_SEC: u32 = 1_000_000_000;

    /// Create a new timestamp
    #[must_use]
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Get current timestamp
    ///
    /// A clock set before the epoch reads as the epoch.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }

    /// Convert to nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u128 {
        self.seconds as u128 * 1_000_000_000 + self.nanos as u128
    }

    /// Get duration since an earlier timestamp, zero if `earlier` is later
    #[must_use]
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        if self <= earlier {
            return Duration::ZERO;
        }
        let mut seconds = self.seconds - earlier.seconds;
        let mut nanos = i64::from(self.nanos) - i64::from(earlier.nanos);

        if nanos < 0 {
            seconds -= 1;
            nanos += i64::from(Self::NANOS_PER_SEC);
        }

        Duration::new(seconds, nanos as u32)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.seconds, self.nanos / 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::new(100, 500_000_000); // 100.5s
        let t2 = Timestamp::new(102, 200_000_000); // 102.2s

        let duration = t2.duration_since(&t1);
        assert_eq!(duration, Duration::from_millis(1_700));
    }

    #[test]
    fn test_duration_since_later_is_zero() {
        let t1 = Timestamp::new(100, 0);
        let t2 = Timestamp::new(99, 0);
        assert_eq!(t2.duration_since(&t1), Duration::ZERO);
    }

    #[test]
    fn test_nanos_ordering() {
        let t = Timestamp::new(100, 900_000_000);
        let later = Timestamp::new(101, 100_000_000);
        assert_eq!(later.duration_since(&t), Duration::from_millis(200));
        assert_eq!(t.as_nanos() + 200_000_000, later.as_nanos());
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let t1 = Timestamp::now();
        let t2 = Timestamp::now();
        assert!(t2 >= t1);
        assert!(t1.seconds > 0);
    }
}
