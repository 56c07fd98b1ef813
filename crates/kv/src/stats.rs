//! Bucket-wide counters shared by partitions and background tasks.
//!
//! The original engine kept these in a process-wide stats singleton; here
//! they are an explicit collaborator handed to every partition at
//! construction so nothing assumes ambient state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use driftkv_types::config::QuotaConfig;

/// Shared engine statistics and quota accounting.
#[derive(Debug)]
pub struct KvStats {
    /// Estimated bytes of item data currently resident.
    mem_used: AtomicUsize,
    /// Bucket memory quota in bytes (0 = unlimited).
    max_size: AtomicUsize,
    /// Item pager frees memory down to this level.
    mem_low_wat: AtomicUsize,
    /// Crossing this level triggers the item pager.
    mem_high_wat: AtomicUsize,

    /// Items expired by the expiry pager.
    pub expired_pager: AtomicU64,
    /// Items expired during compaction.
    pub expired_compactor: AtomicU64,
    /// Items expired on access.
    pub expired_access: AtomicU64,

    /// Completed full background fetches.
    pub bg_fetched: AtomicU64,
    /// Completed metadata-only background fetches.
    pub bg_meta_fetched: AtomicU64,
    /// Background fetches with recorded timings.
    pub bg_num_operations: AtomicU64,
    /// Total microseconds items waited for a background fetch to start.
    pub bg_wait_total_us: AtomicU64,
    /// Total microseconds spent loading in background fetches.
    pub bg_load_total_us: AtomicU64,
    /// Background fetches still queued.
    pub num_remaining_bg_items: AtomicUsize,

    /// Client operations currently parked on pending partitions.
    pub pending_ops: AtomicUsize,
    /// Total client operations that were ever parked.
    pub pending_ops_total: AtomicU64,

    /// High-priority persistence waiters across the bucket.
    pub high_priority_requests: AtomicUsize,

    /// Adaptive checkpoint-flush wait, in seconds.
    ///
    /// The original keeps this as one process-wide atomic shared by every
    /// partition; it lives here so the sharing is explicit.
    pub chk_flush_timeout_secs: AtomicU64,

    /// Items drained to the persistence layer.
    pub tot_flushed: AtomicU64,
}

impl KvStats {
    /// Creates stats seeded from the quota configuration.
    pub fn new(quota: &QuotaConfig) -> Self {
        Self {
            mem_used: AtomicUsize::new(0),
            max_size: AtomicUsize::new(quota.max_size),
            mem_low_wat: AtomicUsize::new(quota.low_watermark()),
            mem_high_wat: AtomicUsize::new(quota.high_watermark()),
            expired_pager: AtomicU64::new(0),
            expired_compactor: AtomicU64::new(0),
            expired_access: AtomicU64::new(0),
            bg_fetched: AtomicU64::new(0),
            bg_meta_fetched: AtomicU64::new(0),
            bg_num_operations: AtomicU64::new(0),
            bg_wait_total_us: AtomicU64::new(0),
            bg_load_total_us: AtomicU64::new(0),
            num_remaining_bg_items: AtomicUsize::new(0),
            pending_ops: AtomicUsize::new(0),
            pending_ops_total: AtomicU64::new(0),
            high_priority_requests: AtomicUsize::new(0),
            chk_flush_timeout_secs: AtomicU64::new(0),
            tot_flushed: AtomicU64::new(0),
        }
    }

    /// Current resident memory estimate.
    pub fn mem_used(&self) -> usize {
        self.mem_used.load(Ordering::Relaxed)
    }

    /// Charges `bytes` against the quota.
    pub fn mem_allocated(&self, bytes: usize) {
        self.mem_used.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Releases `bytes` of quota, saturating at zero.
    pub fn mem_freed(&self, bytes: usize) {
        let mut current = self.mem_used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.mem_used.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Bucket quota in bytes (0 = unlimited).
    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Effective low watermark.
    pub fn mem_low_wat(&self) -> usize {
        self.mem_low_wat.load(Ordering::Relaxed)
    }

    /// Effective high watermark.
    pub fn mem_high_wat(&self) -> usize {
        self.mem_high_wat.load(Ordering::Relaxed)
    }

    /// True when an allocation of `bytes` fits under the quota.
    pub fn has_memory_for(&self, bytes: usize) -> bool {
        let quota = self.max_size();
        quota == 0 || self.mem_used().saturating_add(bytes) <= quota
    }

    /// Total items expired, across all sources.
    pub fn total_expired(&self) -> u64 {
        self.expired_pager.load(Ordering::Relaxed)
            + self.expired_compactor.load(Ordering::Relaxed)
            + self.expired_access.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn quota(max: usize) -> QuotaConfig {
        QuotaConfig { max_size: max, mem_low_wat: 0, mem_high_wat: 0 }
    }

    #[test]
    fn test_watermarks_derived() {
        let stats = KvStats::new(&quota(100_000));
        assert_eq!(stats.mem_low_wat(), 75_000);
        assert_eq!(stats.mem_high_wat(), 85_000);
    }

    #[test]
    fn test_mem_accounting() {
        let stats = KvStats::new(&quota(1000));
        stats.mem_allocated(600);
        assert_eq!(stats.mem_used(), 600);
        stats.mem_freed(200);
        assert_eq!(stats.mem_used(), 400);
        // Freeing more than allocated saturates at zero.
        stats.mem_freed(10_000);
        assert_eq!(stats.mem_used(), 0);
    }

    #[test]
    fn test_has_memory_for() {
        let stats = KvStats::new(&quota(1000));
        assert!(stats.has_memory_for(1000));
        stats.mem_allocated(900);
        assert!(stats.has_memory_for(100));
        assert!(!stats.has_memory_for(101));
    }

    #[test]
    fn test_unlimited_quota() {
        let stats = KvStats::new(&quota(0));
        stats.mem_allocated(usize::MAX / 2);
        assert!(stats.has_memory_for(usize::MAX / 2));
    }
}
