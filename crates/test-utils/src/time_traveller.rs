//! Time travel for expiry tests.

use std::sync::Arc;
use std::time::Duration;

use driftkv_types::clock::WallClock;

/// Advances a shared [`WallClock`] without sleeping.
///
/// Expiry decisions read the engine's clock, so tests move "now" forward
/// rather than waiting for TTLs to lapse.
///
/// # Example
///
/// ```
/// # use std::{sync::Arc, time::Duration};
/// # use driftkv_types::clock::WallClock;
/// # use driftkv_test_utils::TimeTraveller;
/// let clock = Arc::new(WallClock::new());
/// let traveller = TimeTraveller::new(Arc::clone(&clock));
/// let before = clock.now_secs();
/// traveller.travel(Duration::from_secs(11));
/// assert!(clock.now_secs() >= before + 11);
/// ```
pub struct TimeTraveller {
    clock: Arc<WallClock>,
}

impl TimeTraveller {
    /// Binds the traveller to an engine clock.
    pub fn new(clock: Arc<WallClock>) -> Self {
        Self { clock }
    }

    /// Moves the clock forward.
    pub fn travel(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// The bound clock.
    pub fn clock(&self) -> &Arc<WallClock> {
        &self.clock
    }
}
