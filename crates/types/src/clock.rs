//! Wall clock with an adjustable offset.
//!
//! Expiry decisions compare stored absolute expiry times against "now".
//! Tests need to move "now" forward without sleeping, so the clock carries
//! a signed offset that test helpers can advance. Production code leaves
//! the offset at zero.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A shareable wall clock.
///
/// All reads go through [`SystemTime::now`] plus the current offset. The
/// offset only ever moves forward; the clock never runs backwards relative
/// to a previous read with the same offset.
#[derive(Debug, Default)]
pub struct WallClock {
    /// Seconds added to the real wall time.
    offset_secs: AtomicI64,
}

impl WallClock {
    /// Creates a clock with no offset.
    pub fn new() -> Self {
        Self { offset_secs: AtomicI64::new(0) }
    }

    /// Current time in whole seconds since the Unix epoch.
    pub fn now_secs(&self) -> u64 {
        let real = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let offset = self.offset_secs.load(Ordering::Relaxed);
        real.saturating_add_signed(offset)
    }

    /// Current time in microseconds since the Unix epoch.
    pub fn now_micros(&self) -> u64 {
        let real = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let offset = self.offset_secs.load(Ordering::Relaxed);
        real.saturating_add_signed(offset.saturating_mul(1_000_000))
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        self.offset_secs.fetch_add(by.as_secs() as i64, Ordering::Relaxed);
    }

    /// Current offset in seconds, for stat emission.
    pub fn offset_secs(&self) -> i64 {
        self.offset_secs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_reasonable() {
        let clock = WallClock::new();
        // After 2020-01-01 in both units.
        assert!(clock.now_secs() > 1_577_836_800);
        assert!(clock.now_micros() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_advance_moves_forward() {
        let clock = WallClock::new();
        let before = clock.now_secs();
        clock.advance(Duration::from_secs(11));
        let after = clock.now_secs();
        assert!(after >= before + 11, "expected {after} >= {before} + 11");
    }

    #[test]
    fn test_advance_accumulates() {
        let clock = WallClock::new();
        clock.advance(Duration::from_secs(10));
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.offset_secs(), 20);
    }

    #[test]
    fn test_micros_track_offset() {
        let clock = WallClock::new();
        let before = clock.now_micros();
        clock.advance(Duration::from_secs(5));
        assert!(clock.now_micros() >= before + 5_000_000);
    }
}
