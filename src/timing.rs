//! Monotonic timestamps and elapsed-time arithmetic.
//!
//! Measurement windows are bracketed with [`Timestamp::now`], which reads
//! `CLOCK_MONOTONIC` so that wall-clock adjustments (NTP, DST) cannot skew a
//! run. The difference of two timestamps is computed with explicit
//! second/nanosecond borrow arithmetic, mirroring the classic `timespec`
//! subtraction idiom.

use nix::time::{clock_gettime, ClockId};
use std::time::Duration;

/// Nanoseconds per second, used by the borrow in [`elapsed_between`].
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A monotonic point in time with whole-second and nanosecond fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: i64,
}

impl Timestamp {
    /// Capture the current monotonic time.
    pub fn now() -> Result<Self, nix::Error> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
        Ok(Self {
            secs: ts.tv_sec(),
            nanos: ts.tv_nsec(),
        })
    }

    /// Interpret the timestamp as a span of fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / NANOS_PER_SEC as f64
    }

    /// Convert a non-negative timestamp difference into a [`Duration`].
    pub fn to_duration(&self) -> Duration {
        Duration::new(self.secs.max(0) as u64, self.nanos.max(0) as u32)
    }
}

/// Compute `end - start` with nanosecond borrow.
///
/// When `end`'s nanosecond field is smaller than `start`'s, one whole second
/// is borrowed and `10^9` nanoseconds are added to the remainder. Callers
/// guarantee `end >= start` by construction (both come from the same
/// monotonic clock, captured in order).
pub fn elapsed_between(start: Timestamp, end: Timestamp) -> Timestamp {
    if end.nanos - start.nanos < 0 {
        Timestamp {
            secs: end.secs - start.secs - 1,
            nanos: NANOS_PER_SEC + end.nanos - start.nanos,
        }
    } else {
        Timestamp {
            secs: end.secs - start.secs,
            nanos: end.nanos - start.nanos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_without_borrow() {
        let start = Timestamp { secs: 5, nanos: 100 };
        let end = Timestamp { secs: 6, nanos: 300 };
        assert_eq!(
            elapsed_between(start, end),
            Timestamp { secs: 1, nanos: 200 }
        );
    }

    #[test]
    fn elapsed_with_borrow() {
        let start = Timestamp { secs: 5, nanos: 200 };
        let end = Timestamp { secs: 6, nanos: 100 };
        assert_eq!(
            elapsed_between(start, end),
            Timestamp {
                secs: 0,
                nanos: 999_999_900
            }
        );
    }

    #[test]
    fn elapsed_zero() {
        let t = Timestamp { secs: 42, nanos: 7 };
        assert_eq!(elapsed_between(t, t), Timestamp { secs: 0, nanos: 0 });
    }

    #[test]
    fn secs_f64_and_duration() {
        let t = Timestamp {
            secs: 2,
            nanos: 500_000_000,
        };
        assert!((t.as_secs_f64() - 2.5).abs() < 1e-12);
        assert_eq!(t.to_duration(), Duration::from_millis(2500));
    }

    #[test]
    fn now_is_monotonic() {
        let a = Timestamp::now().unwrap();
        let b = Timestamp::now().unwrap();
        assert!(b >= a);
    }
}
