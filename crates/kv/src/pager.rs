//! Background pagers for expiry and memory reclamation.
//!
//! Both pagers are thin interval loops over a synchronous `run_cycle`;
//! tests drive the cycle directly, production spawns the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::debug;

use crate::bucket::Bucket;

/// Default interval between item pager checks.
const ITEM_PAGER_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically removes expired items from active partitions.
pub struct ExpiryPager {
    bucket: Arc<Bucket>,
    interval: Duration,
}

impl ExpiryPager {
    /// Creates a pager using the bucket's configured interval.
    pub fn new(bucket: Arc<Bucket>) -> Self {
        let interval = bucket.config().exp_pager_interval;
        Self { bucket, interval }
    }

    /// Overrides the interval (for testing).
    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one expiry sweep.
    pub fn run_cycle(&self) -> usize {
        debug!("starting expiry pager cycle");
        self.bucket.run_expiry_pager()
    }

    /// Starts the pager as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_cycle();
            }
        })
    }
}

/// Frees memory down to the low watermark when the high watermark is hit.
pub struct ItemPager {
    bucket: Arc<Bucket>,
    interval: Duration,
}

impl ItemPager {
    /// Creates a pager with the default check interval.
    pub fn new(bucket: Arc<Bucket>) -> Self {
        Self { bucket, interval: ITEM_PAGER_INTERVAL }
    }

    /// Overrides the interval (for testing).
    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one paging pass when memory sits above the high watermark.
    pub fn run_cycle(&self) -> usize {
        let stats = self.bucket.stats();
        if stats.mem_high_wat() == 0 || stats.mem_used() < stats.mem_high_wat() {
            return 0;
        }
        debug!(
            mem_used = stats.mem_used(),
            high_wat = stats.mem_high_wat(),
            "starting item pager cycle"
        );
        self.bucket.run_item_pager()
    }

    /// Starts the pager as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_cycle();
            }
        })
    }
}
