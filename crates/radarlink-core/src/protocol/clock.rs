//! Millisecond clock and wraparound-safe deadlines
//!
//! The protocol only ever compares times by unsigned subtraction of a 32-bit
//! millisecond counter, so a counter rolling over mid-wait is harmless.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Largest delay a [`Deadline`] accepts; longer requests are clamped
pub const MAX_DELAY_MS: u32 = i32::MAX as u32;

/// Source of monotonic milliseconds
pub trait Clock: Send + Sync {
    /// Current counter value; may wrap around
    fn now_ms(&self) -> u32;

    /// Pause the calling thread
    fn sleep_ms(&self, ms: u32);
}

/// [`Clock`] backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose counter starts at zero now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wraparound
        self.origin.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Clock that only moves when told to
///
/// `sleep_ms` advances the counter instead of blocking, which makes timeout
/// behaviour deterministic. Shared through `Arc` between the code under test
/// and whatever drives it.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Create a clock reading `start`
    pub fn starting_at(start: u32) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    /// Move the counter forward, wrapping past `u32::MAX`
    pub fn advance(&self, ms: u32) {
        // fetch_add wraps on overflow
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.advance(ms);
    }
}

/// Milliseconds from `since` to `now`, correct across counter wraparound
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// A point in time after which a wait is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: u32,
    duration: u32,
}

impl Deadline {
    /// Deadline `duration_ms` after `start`
    pub fn new(start: u32, duration_ms: u32) -> Self {
        Self {
            start,
            duration: duration_ms.min(MAX_DELAY_MS),
        }
    }

    /// Deadline `duration_ms` from the clock's current time
    pub fn after(clock: &dyn Clock, duration_ms: u32) -> Self {
        Self::new(clock.now_ms(), duration_ms)
    }

    /// Whether the deadline has passed at `now`
    pub fn expired_at(&self, now: u32) -> bool {
        elapsed_ms(now, self.start) >= self.duration
    }

    /// Whether the deadline has passed on `clock`
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        self.expired_at(clock.now_ms())
    }

    /// Milliseconds left before expiry, zero once expired
    pub fn remaining_at(&self, now: u32) -> u32 {
        self.duration.saturating_sub(elapsed_ms(now, self.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_basic() {
        let d = Deadline::new(1000, 50);
        assert!(!d.expired_at(1000));
        assert!(!d.expired_at(1049));
        assert!(d.expired_at(1050));
        assert_eq!(d.remaining_at(1020), 30);
        assert_eq!(d.remaining_at(2000), 0);
    }

    #[test]
    fn test_deadline_across_wraparound() {
        let start = u32::MAX - 10;
        let d = Deadline::new(start, 100);
        assert!(!d.expired_at(u32::MAX));
        assert!(!d.expired_at(0));
        assert!(!d.expired_at(88));
        assert!(d.expired_at(89));
        assert_eq!(elapsed_ms(5, start), 16);
    }

    #[test]
    fn test_zero_duration_expires_immediately() {
        assert!(Deadline::new(42, 0).expired_at(42));
    }

    #[test]
    fn test_duration_clamped() {
        let d = Deadline::new(0, u32::MAX);
        assert!(!d.expired_at(MAX_DELAY_MS - 1));
        assert!(d.expired_at(MAX_DELAY_MS));
    }

    #[test]
    fn test_manual_clock_wraps() {
        let clock = ManualClock::starting_at(u32::MAX - 1);
        let d = Deadline::after(&clock, 5);
        clock.sleep_ms(3);
        assert_eq!(clock.now_ms(), 1);
        assert!(!d.expired(&clock));
        clock.advance(2);
        assert!(d.expired(&clock));
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let t0 = clock.now_ms();
        clock.sleep_ms(5);
        assert!(elapsed_ms(clock.now_ms(), t0) >= 5);
    }
}
