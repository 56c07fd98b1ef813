//! Hybrid Logical Clock for CAS generation.
//!
//! CAS values are 64-bit hybrid timestamps: the upper 48 bits carry wall
//! time in microseconds, the lower 16 bits a logical counter that absorbs
//! bursts within one microsecond and clock skew between peers.
//!
//! ```text
//! | 48 bits: physical (µs since epoch) | 16 bits: logical counter |
//! ```
//!
//! # Thread Safety
//!
//! The clock is a single `AtomicU64` holding the greatest CAS ever seen or
//! minted; [`next`](HybridLogicalClock::next) runs a compare-exchange loop
//! and [`observe`](HybridLogicalClock::observe) is a `fetch_max`. No locks
//! are taken and results are totally ordered per partition.
//!
//! # Drift accounting
//!
//! A peer whose physical clock runs ahead pushes our CAS values ahead of
//! local wall time; one running behind delivers stale timestamps. Both
//! conditions are counted against configured thresholds so operators can
//! alert on cluster clock skew.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of bits used for the logical counter portion.
const LOGICAL_BITS: u32 = 16;

/// Mask for extracting the logical counter (16 bits).
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Converts a physical microsecond timestamp into hybrid format.
#[inline]
const fn from_physical(now_us: u64) -> u64 {
    now_us << LOGICAL_BITS
}

/// Extracts the physical microsecond portion of a hybrid timestamp.
#[inline]
pub const fn physical_of(cas: u64) -> u64 {
    cas >> LOGICAL_BITS
}

/// Extracts the logical counter portion of a hybrid timestamp.
#[inline]
pub const fn logical_of(cas: u64) -> u64 {
    cas & LOGICAL_MASK
}

/// Drift statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftStats {
    /// Observations ahead of local time by more than the threshold.
    pub ahead_exceptions: u64,
    /// Observations behind local time by more than the threshold.
    pub behind_exceptions: u64,
}

/// A monotonic hybrid logical clock.
#[derive(Debug)]
pub struct HybridLogicalClock {
    /// Greatest CAS minted or observed.
    max_cas: AtomicU64,
    /// Allowed forward skew in microseconds before counting an exception.
    ahead_threshold_us: u64,
    /// Allowed backward skew in microseconds before counting an exception.
    behind_threshold_us: u64,
    ahead_exceptions: AtomicU64,
    behind_exceptions: AtomicU64,
}

impl HybridLogicalClock {
    /// Creates a clock seeded with a previously persisted maximum CAS.
    pub fn new(initial_cas: u64, ahead_threshold_us: u64, behind_threshold_us: u64) -> Self {
        Self {
            max_cas: AtomicU64::new(initial_cas),
            ahead_threshold_us,
            behind_threshold_us,
            ahead_exceptions: AtomicU64::new(0),
            behind_exceptions: AtomicU64::new(0),
        }
    }

    /// Mints the next CAS value.
    ///
    /// The result is `max(max_seen + 1, hybrid(now))`, so values are
    /// strictly increasing even when the wall clock stalls or steps
    /// backwards. When the minted value runs ahead of local wall time by
    /// more than the ahead threshold, a drift exception is recorded.
    pub fn next(&self, now_us: u64) -> u64 {
        let physical = from_physical(now_us);
        loop {
            let current = self.max_cas.load(Ordering::Acquire);
            let candidate = std::cmp::max(current.wrapping_add(1), physical);
            match self.max_cas.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let minted_physical = physical_of(candidate);
                    if minted_physical > now_us
                        && minted_physical - now_us > self.ahead_threshold_us
                    {
                        self.ahead_exceptions.fetch_add(1, Ordering::Relaxed);
                    }
                    return candidate;
                }
                Err(_) => continue,
            }
        }
    }

    /// Merges a CAS observed from a peer or client.
    ///
    /// `max_seen_cas` absorbs the observation; drift exceptions are counted
    /// when the observed physical time deviates from local wall time past
    /// either threshold.
    pub fn observe(&self, cas: u64, now_us: u64) {
        let observed_physical = physical_of(cas);
        if observed_physical > now_us {
            if observed_physical - now_us > self.ahead_threshold_us {
                self.ahead_exceptions.fetch_add(1, Ordering::Relaxed);
            }
        } else if now_us - observed_physical > self.behind_threshold_us {
            self.behind_exceptions.fetch_add(1, Ordering::Relaxed);
        }
        self.max_cas.fetch_max(cas, Ordering::AcqRel);
    }

    /// Greatest CAS minted or observed so far.
    pub fn max_cas(&self) -> u64 {
        self.max_cas.load(Ordering::Acquire)
    }

    /// Drift exception counters.
    pub fn drift_stats(&self) -> DriftStats {
        DriftStats {
            ahead_exceptions: self.ahead_exceptions.load(Ordering::Relaxed),
            behind_exceptions: self.behind_exceptions.load(Ordering::Relaxed),
        }
    }

    /// Clears the drift exception counters.
    pub fn reset_stats(&self) {
        self.ahead_exceptions.store(0, Ordering::Relaxed);
        self.behind_exceptions.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    const NOW_US: u64 = 1_700_000_000_000_000;

    fn clock() -> HybridLogicalClock {
        HybridLogicalClock::new(0, 5_000_000, 5_000_000)
    }

    #[test]
    fn test_next_is_strictly_increasing() {
        let hlc = clock();
        let mut last = 0;
        for _ in 0..1000 {
            let cas = hlc.next(NOW_US);
            assert!(cas > last, "CAS must strictly increase: {cas} after {last}");
            last = cas;
        }
    }

    #[test]
    fn test_next_tracks_physical_time() {
        let hlc = clock();
        let cas = hlc.next(NOW_US);
        assert_eq!(physical_of(cas), NOW_US);
        assert_eq!(logical_of(cas), 0);
    }

    #[test]
    fn test_logical_counter_absorbs_same_microsecond() {
        let hlc = clock();
        let first = hlc.next(NOW_US);
        let second = hlc.next(NOW_US);
        assert_eq!(physical_of(second), NOW_US);
        assert_eq!(logical_of(second), logical_of(first) + 1);
    }

    #[test]
    fn test_monotonic_through_clock_step_back() {
        let hlc = clock();
        let first = hlc.next(NOW_US);
        // Wall clock stepped back by a second; CAS still advances.
        let second = hlc.next(NOW_US - 1_000_000);
        assert!(second > first);
        assert_eq!(physical_of(second), NOW_US);
    }

    #[test]
    fn test_observe_raises_max() {
        let hlc = clock();
        let remote = from_physical(NOW_US + 1_000);
        hlc.observe(remote, NOW_US);
        assert_eq!(hlc.max_cas(), remote);
        let cas = hlc.next(NOW_US);
        assert!(cas > remote);
    }

    #[test]
    fn test_observe_ignores_stale_cas() {
        let hlc = clock();
        let cas = hlc.next(NOW_US);
        hlc.observe(from_physical(NOW_US - 1_000), NOW_US);
        assert_eq!(hlc.max_cas(), cas);
    }

    #[test]
    fn test_drift_ahead_exception() {
        let hlc = clock();
        // 10 s ahead of local time exceeds the 5 s threshold.
        hlc.observe(from_physical(NOW_US + 10_000_000), NOW_US);
        let stats = hlc.drift_stats();
        assert_eq!(stats.ahead_exceptions, 1);
        assert_eq!(stats.behind_exceptions, 0);
    }

    #[test]
    fn test_drift_behind_exception() {
        let hlc = clock();
        hlc.observe(from_physical(NOW_US - 10_000_000), NOW_US);
        let stats = hlc.drift_stats();
        assert_eq!(stats.ahead_exceptions, 0);
        assert_eq!(stats.behind_exceptions, 1);
    }

    #[test]
    fn test_drift_within_threshold_not_counted() {
        let hlc = clock();
        hlc.observe(from_physical(NOW_US + 1_000_000), NOW_US);
        hlc.observe(from_physical(NOW_US - 1_000_000), NOW_US);
        assert_eq!(hlc.drift_stats(), DriftStats::default());
    }

    #[test]
    fn test_next_ahead_exception_after_far_future_observe() {
        let hlc = clock();
        hlc.observe(from_physical(NOW_US + 60_000_000), NOW_US);
        let before = hlc.drift_stats().ahead_exceptions;
        // Minting now continues from the future value, which is still far
        // ahead of local time.
        hlc.next(NOW_US);
        assert!(hlc.drift_stats().ahead_exceptions > before);
    }

    #[test]
    fn test_reset_stats() {
        let hlc = clock();
        hlc.observe(from_physical(NOW_US + 10_000_000), NOW_US);
        assert_ne!(hlc.drift_stats(), DriftStats::default());
        hlc.reset_stats();
        assert_eq!(hlc.drift_stats(), DriftStats::default());
    }

    #[test]
    fn test_seeded_clock_continues_past_seed() {
        let seed = from_physical(NOW_US) | 0x42;
        let hlc = HybridLogicalClock::new(seed, 5_000_000, 5_000_000);
        assert!(hlc.next(NOW_US) > seed);
    }
}
