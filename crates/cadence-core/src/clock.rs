//! Session clock
//!
//! All scheduling decisions are made on a monotonic clock that starts when
//! the engine is created. The mixing path works in microseconds, the virtual
//! timers in nanoseconds.

use std::time::{Duration, Instant};

/// Frequency of the guest timebase register (79.8 MHz)
pub const GUEST_TIMEBASE_HZ: u64 = 79_800_000;

/// Monotonic clock anchored at session start
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds since session start
    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Nanoseconds since session start
    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert nanoseconds into guest timebase ticks
pub fn ns_to_timebase(ns: u64) -> u64 {
    ((ns as u128 * GUEST_TIMEBASE_HZ as u128) / 1_000_000_000) as u64
}

/// Duration to sleep for a positive microsecond delta
pub fn us_duration(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timebase_conversion() {
        assert_eq!(ns_to_timebase(1_000_000_000), GUEST_TIMEBASE_HZ);
        assert_eq!(ns_to_timebase(0), 0);
        assert_eq!(ns_to_timebase(1_000), 79);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SessionClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_negative_delta_clamps_to_zero() {
        assert_eq!(us_duration(-5), Duration::ZERO);
        assert_eq!(us_duration(1500), Duration::from_micros(1500));
    }
}
