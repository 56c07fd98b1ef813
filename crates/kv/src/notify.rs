//! I/O completion notification seam.
//!
//! Waiter cookies are owned by the connection layer; the core holds them
//! only as keys and reports completions through this trait. Notifications
//! are always dispatched with internal mutexes released so the connection
//! layer may immediately re-enter the engine.

use driftkv_types::{CookieId, Status};
use parking_lot::Mutex;

/// Sink for asynchronous operation completions.
pub trait IoNotifier: Send + Sync {
    /// Reports that the operation parked under `cookie` finished.
    fn notify_io_complete(&self, cookie: CookieId, status: Status);
}

/// Notifier that drops all completions.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl IoNotifier for NullNotifier {
    fn notify_io_complete(&self, _cookie: CookieId, _status: Status) {}
}

/// Notifier that records completions for inspection in tests.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    events: Mutex<Vec<(CookieId, Status)>>,
}

impl CollectingNotifier {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the recorded completions.
    pub fn drain(&self) -> Vec<(CookieId, Status)> {
        std::mem::take(&mut self.events.lock())
    }

    /// Recorded completions, in order.
    pub fn events(&self) -> Vec<(CookieId, Status)> {
        self.events.lock().clone()
    }
}

impl IoNotifier for CollectingNotifier {
    fn notify_io_complete(&self, cookie: CookieId, status: Status) {
        self.events.lock().push((cookie, status));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_notifier_records_in_order() {
        let notifier = CollectingNotifier::new();
        notifier.notify_io_complete(CookieId::new(1), Status::Success);
        notifier.notify_io_complete(CookieId::new(2), Status::TmpFail);
        let events = notifier.events();
        assert_eq!(events, vec![
            (CookieId::new(1), Status::Success),
            (CookieId::new(2), Status::TmpFail),
        ]);
    }

    #[test]
    fn test_drain_clears() {
        let notifier = CollectingNotifier::new();
        notifier.notify_io_complete(CookieId::new(1), Status::Success);
        assert_eq!(notifier.drain().len(), 1);
        assert!(notifier.events().is_empty());
    }
}
