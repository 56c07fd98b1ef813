//! Polling assertions for asynchronous state changes.

use std::time::Duration;

/// Polls `condition` until it returns true or `timeout` elapses.
///
/// Returns whether the condition became true. Poll interval is 10ms.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use driftkv_test_utils::assert_eventually;
/// # async fn example() {
/// let became_true = assert_eventually(Duration::from_secs(1), || true).await;
/// assert!(became_true);
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
