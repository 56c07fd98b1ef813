//! The partition aggregate.
//!
//! A VBucket owns one key-range partition's hash table, checkpoint
//! manager, collections manifest, HLC, bloom filter pair, failover table
//! and counters. Client-visible work arrives through the bucket facade;
//! background tasks (flusher, bg-fetcher, pagers) complete work parked
//! here and notify waiting cookies through the injected notifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use driftkv_types::clock::WallClock;
use driftkv_types::config::KvConfig;
use driftkv_types::hlc::HybridLogicalClock;
use driftkv_types::key::DocKey;
use driftkv_types::{
    CookieId, EvictionPolicy, GenerateBySeqno, GenerateCas, QueueExpired, SnapshotRange, Status,
    TrackReference, VbState, Vbid, WantsDeleted,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bloom::{FilterPair, FilterStatus};
use crate::checkpoint::{CheckpointManager, QueueDirtyResult, QueuedItem};
use crate::collections::VbManifest;
use crate::failover::FailoverTable;
use crate::hash_table::{HashTable, HashTableGuard};
use crate::notify::IoNotifier;
use crate::stats::KvStats;
use crate::stored_value::{Item, StoredValue};

/// What triggered an item's expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireBy {
    /// The expiry pager found it.
    Pager,
    /// Compaction found it.
    Compactor,
    /// A client lookup touched it.
    Access,
}

/// Which kind of persistence a high-priority waiter is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighPriorityNotify {
    /// Waiting for a seqno to become persistent.
    Seqno,
    /// Waiting for a checkpoint id to become persistent.
    CheckpointPersistence,
}

impl HighPriorityNotify {
    fn as_str(self) -> &'static str {
        match self {
            HighPriorityNotify::Seqno => "seqno persistence",
            HighPriorityNotify::CheckpointPersistence => "checkpoint persistence",
        }
    }
}

/// One queued background fetch request.
#[derive(Debug, Clone)]
pub struct BgFetchItem {
    /// Cookie to notify on completion.
    pub cookie: CookieId,
    /// Wall time the fetch was requested, in microseconds.
    pub init_time_us: u64,
    /// True when only metadata is needed.
    pub meta_only: bool,
}

/// All pending fetches for one key.
#[derive(Debug, Default, Clone)]
pub struct BgFetchCtx {
    /// True while every queued fetch is metadata-only.
    pub meta_only: bool,
    /// The queued fetch requests.
    pub items: Vec<BgFetchItem>,
}

#[derive(Debug, Clone, Copy)]
struct HighPriorityEntry {
    cookie: CookieId,
    id: u64,
    by_seqno: bool,
    start_us: u64,
}

#[derive(Debug, Default)]
struct PendingOps {
    cookies: Vec<CookieId>,
    start_us: u64,
}

/// A single key-range partition.
pub struct VBucket {
    id: Vbid,
    state: RwLock<VbState>,
    initial_state: VbState,
    eviction: EvictionPolicy,

    ht: HashTable,
    checkpoint_manager: CheckpointManager,
    manifest: VbManifest,
    hlc: HybridLogicalClock,
    filters: Mutex<FilterPair>,
    failover: FailoverTable,

    clock: Arc<WallClock>,
    stats: Arc<KvStats>,
    notifier: Arc<dyn IoNotifier>,

    flush_timeout_min_secs: u64,
    flush_timeout_max_secs: u64,

    purge_seqno: AtomicU64,
    rollback_item_count: AtomicU64,
    persistence_checkpoint_id: AtomicU64,
    persistence_seqno: AtomicU64,
    persisted_snapshot: Mutex<SnapshotRange>,
    num_expired: AtomicU64,

    ops_create: AtomicU64,
    ops_update: AtomicU64,
    ops_delete: AtomicU64,
    ops_reject: AtomicU64,

    dirty_queue_size: AtomicU64,
    dirty_queue_mem: AtomicU64,
    dirty_queue_fill: AtomicU64,
    dirty_queue_drain: AtomicU64,
    dirty_queue_age: AtomicU64,
    dirty_queue_pending_writes: AtomicU64,

    pending_ops: Mutex<PendingOps>,
    pending_bg_fetches: Mutex<HashMap<DocKey, BgFetchCtx>>,
    hp_waiters: Mutex<Vec<HighPriorityEntry>>,
    num_hp_chks: AtomicUsize,
}

impl VBucket {
    /// Creates a partition.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Vbid,
        state: VbState,
        config: &KvConfig,
        eviction: EvictionPolicy,
        stats: Arc<KvStats>,
        clock: Arc<WallClock>,
        notifier: Arc<dyn IoNotifier>,
        last_seqno: i64,
        snapshot: SnapshotRange,
        max_cas: u64,
    ) -> Self {
        let vb = Self {
            id,
            state: RwLock::new(state),
            initial_state: state,
            eviction,
            ht: HashTable::new(config.ht_size, Arc::clone(&stats)),
            checkpoint_manager: CheckpointManager::new(
                id,
                config.checkpoint,
                last_seqno,
                snapshot,
            ),
            manifest: VbManifest::new(),
            hlc: HybridLogicalClock::new(
                max_cas,
                config.hlc.drift_ahead_threshold_us,
                config.hlc.drift_behind_threshold_us,
            ),
            filters: Mutex::new(FilterPair::new()),
            failover: FailoverTable::new(),
            clock,
            stats,
            notifier,
            flush_timeout_min_secs: config.checkpoint.flush_timeout_min_secs,
            flush_timeout_max_secs: config.checkpoint.flush_timeout_max_secs,
            purge_seqno: AtomicU64::new(0),
            rollback_item_count: AtomicU64::new(0),
            persistence_checkpoint_id: AtomicU64::new(0),
            persistence_seqno: AtomicU64::new(0),
            persisted_snapshot: Mutex::new(snapshot),
            num_expired: AtomicU64::new(0),
            ops_create: AtomicU64::new(0),
            ops_update: AtomicU64::new(0),
            ops_delete: AtomicU64::new(0),
            ops_reject: AtomicU64::new(0),
            dirty_queue_size: AtomicU64::new(0),
            dirty_queue_mem: AtomicU64::new(0),
            dirty_queue_fill: AtomicU64::new(0),
            dirty_queue_drain: AtomicU64::new(0),
            dirty_queue_age: AtomicU64::new(0),
            dirty_queue_pending_writes: AtomicU64::new(0),
            pending_ops: Mutex::new(PendingOps::default()),
            pending_bg_fetches: Mutex::new(HashMap::new()),
            hp_waiters: Mutex::new(Vec::new()),
            num_hp_chks: AtomicUsize::new(0),
        };
        if state == VbState::Active {
            vb.ensure_active_checkpoint_id();
        }
        info!(
            vb = %id,
            state = %state,
            last_seqno,
            snapshot_start = snapshot.start,
            snapshot_end = snapshot.end,
            max_cas,
            "created vbucket"
        );
        vb
    }

    /// Partition id.
    pub fn id(&self) -> Vbid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VbState {
        *self.state.read()
    }

    /// State the partition was created in.
    pub fn initial_state(&self) -> VbState {
        self.initial_state
    }

    /// Eviction policy in force.
    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Hash table.
    pub fn ht(&self) -> &HashTable {
        &self.ht
    }

    /// Checkpoint manager.
    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoint_manager
    }

    /// Collections manifest.
    pub fn manifest(&self) -> &VbManifest {
        &self.manifest
    }

    /// Hybrid logical clock.
    pub fn hlc(&self) -> &HybridLogicalClock {
        &self.hlc
    }

    /// Failover table.
    pub fn failover(&self) -> &FailoverTable {
        &self.failover
    }

    /// Wall clock, in seconds.
    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Highest seqno assigned in this partition.
    pub fn high_seqno(&self) -> i64 {
        self.checkpoint_manager.high_seqno()
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Transitions the partition to a new state.
    ///
    /// Entering active forces the open checkpoint id to at least 2 (the
    /// history-reset sentinel). Leaving for replica or dead fails parked
    /// operations with `NotMyVbucket`, cancels pending background fetches
    /// and clears the bloom filters.
    pub fn set_state(&self, to: VbState) {
        {
            let mut state = self.state.write();
            if to == VbState::Active {
                self.ensure_active_checkpoint_id();
            }
            info!(vb = %self.id, from = %*state, to = %to, "transitioning vbucket state");
            *state = to;
        }
        match to {
            VbState::Active => self.fire_all_ops_for_state(),
            VbState::Pending => {}
            VbState::Replica | VbState::Dead => {
                self.notify_all_pending_failed();
                self.clear_filter();
            }
        }
    }

    fn ensure_active_checkpoint_id(&self) {
        if self.checkpoint_manager.open_checkpoint_id() < 2 {
            self.checkpoint_manager.set_open_checkpoint_id(2);
        }
    }

    // ------------------------------------------------------------------
    // Pending client operations
    // ------------------------------------------------------------------

    /// Parks a client operation until the partition leaves `pending`.
    pub fn add_pending_op(&self, cookie: CookieId) {
        let mut pending = self.pending_ops.lock();
        if pending.cookies.is_empty() {
            pending.start_us = self.clock.now_micros();
        }
        pending.cookies.push(cookie);
        self.stats.pending_ops.fetch_add(1, Ordering::Relaxed);
        self.stats.pending_ops_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Completes every parked operation with `code`.
    ///
    /// The pending-ops mutex is released before any notification is
    /// dispatched.
    pub fn fire_all_ops(&self, code: Status) {
        let cookies = {
            let mut pending = self.pending_ops.lock();
            if pending.cookies.is_empty() {
                return;
            }
            pending.start_us = 0;
            std::mem::take(&mut pending.cookies)
        };
        self.stats.pending_ops.fetch_sub(cookies.len(), Ordering::Relaxed);
        for cookie in &cookies {
            self.notifier.notify_io_complete(*cookie, code);
        }
        info!(vb = %self.id, state = %self.state(), count = cookies.len(), "fired pending ops");
    }

    /// Completes parked operations according to the current state.
    pub fn fire_all_ops_for_state(&self) {
        match self.state() {
            VbState::Active => self.fire_all_ops(Status::Success),
            VbState::Pending => {}
            VbState::Replica | VbState::Dead => self.fire_all_ops(Status::NotMyVbucket),
        }
    }

    /// Number of operations currently parked.
    pub fn num_pending_ops(&self) -> usize {
        self.pending_ops.lock().cookies.len()
    }

    // ------------------------------------------------------------------
    // Dirty queue
    // ------------------------------------------------------------------

    /// Queues a mutated stored value into the checkpoint stream.
    ///
    /// Assigns the seqno (and CAS, when requested) back onto the stored
    /// value. The hash-bucket guard for the value must be held by the
    /// caller.
    pub fn queue_dirty(
        &self,
        sv: &mut StoredValue,
        generate_by_seqno: GenerateBySeqno,
        generate_cas: GenerateCas,
    ) -> QueueDirtyResult {
        let item = QueuedItem::from_stored_value(sv, self.id, self.now_secs());
        let size = item.size();
        let value_bytes = sv.value().map(<[u8]>::len).unwrap_or(0);
        let queued_time = item.queued_time_secs();
        let result = self.checkpoint_manager.queue_dirty(
            item,
            generate_by_seqno,
            generate_cas,
            &self.hlc,
            self.clock.now_micros(),
        );
        sv.set_seqno(result.seqno);
        if generate_cas == GenerateCas::Yes {
            sv.set_cas(result.cas);
        }
        self.stats_for_queueing(size, value_bytes, queued_time);
        result
    }

    /// Queues a system event built with its final seqno.
    pub fn queue_system_event_with<F>(
        &self,
        generate_by_seqno: GenerateBySeqno,
        explicit_seqno: Option<i64>,
        build: F,
    ) -> QueueDirtyResult
    where
        F: FnOnce(i64) -> QueuedItem,
    {
        let result = self.checkpoint_manager.queue_system_event_with(
            generate_by_seqno,
            explicit_seqno,
            build,
        );
        self.dirty_queue_size.fetch_add(1, Ordering::Relaxed);
        self.dirty_queue_fill.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn stats_for_queueing(&self, item_bytes: usize, value_bytes: usize, queued_time: u64) {
        self.dirty_queue_size.fetch_add(1, Ordering::Relaxed);
        self.dirty_queue_mem.fetch_add(item_bytes as u64, Ordering::Relaxed);
        self.dirty_queue_fill.fetch_add(1, Ordering::Relaxed);
        self.dirty_queue_age.fetch_add(queued_time, Ordering::Relaxed);
        self.dirty_queue_pending_writes.fetch_add(value_bytes as u64, Ordering::Relaxed);
    }

    /// Adjusts dirty-queue stats as the flusher drains one item.
    pub fn stats_for_flushing(&self, item_bytes: usize, value_bytes: usize, queued_time: u64) {
        saturating_sub(&self.dirty_queue_size, 1);
        saturating_sub(&self.dirty_queue_mem, item_bytes as u64);
        self.dirty_queue_drain.fetch_add(1, Ordering::Relaxed);
        saturating_sub(&self.dirty_queue_age, queued_time);
        saturating_sub(&self.dirty_queue_pending_writes, value_bytes as u64);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Locates a valid entry under the held hash-bucket guard.
    ///
    /// An expired live entry found on an active partition is soft-deleted
    /// and queued (charged to access expiry) when `queue_expired` says
    /// so. Returns the entry's position, or `None` per the caller's
    /// tolerance for deleted entries.
    pub fn fetch_valid_value(
        &self,
        guard: &mut HashTableGuard<'_>,
        key: &DocKey,
        wants_deleted: WantsDeleted,
        track_reference: TrackReference,
        queue_expired: QueueExpired,
    ) -> Option<usize> {
        let pos = guard.find(key, WantsDeleted::Yes)?;
        let (deleted, temp, expired) = {
            let entry = guard.entry(pos);
            (entry.is_deleted(), entry.is_temp_initial(), entry.is_expired(self.now_secs()))
        };
        if deleted && wants_deleted == WantsDeleted::No {
            return None;
        }
        if track_reference == TrackReference::Yes && !deleted {
            guard.entry_mut(pos).referenced();
        }
        if !deleted && !temp && expired {
            if self.state() != VbState::Active {
                return if wants_deleted == WantsDeleted::Yes { Some(pos) } else { None };
            }
            if queue_expired == QueueExpired::Yes {
                self.inc_expiration_stat(ExpireBy::Access);
                guard.soft_delete(pos);
                self.queue_dirty(guard.entry_mut(pos), GenerateBySeqno::Yes, GenerateCas::Yes);
            }
            return if wants_deleted == WantsDeleted::Yes { Some(pos) } else { None };
        }
        Some(pos)
    }

    /// Charges one expiration to its source.
    pub fn inc_expiration_stat(&self, source: ExpireBy) {
        match source {
            ExpireBy::Pager => self.stats.expired_pager.fetch_add(1, Ordering::Relaxed),
            ExpireBy::Compactor => self.stats.expired_compactor.fetch_add(1, Ordering::Relaxed),
            ExpireBy::Access => self.stats.expired_access.fetch_add(1, Ordering::Relaxed),
        };
        self.num_expired.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Background fetches
    // ------------------------------------------------------------------

    /// Queues a background fetch for `key`.
    ///
    /// Returns the number of keys with pending fetches.
    pub fn queue_bg_fetch(&self, key: DocKey, fetch: BgFetchItem) -> usize {
        let mut pending = self.pending_bg_fetches.lock();
        let ctx = pending.entry(key).or_insert_with(|| BgFetchCtx {
            meta_only: true,
            items: Vec::new(),
        });
        if !fetch.meta_only {
            ctx.meta_only = false;
        }
        ctx.items.push(fetch);
        self.stats.num_remaining_bg_items.fetch_add(1, Ordering::Relaxed);
        pending.len()
    }

    /// Takes ownership of every pending fetch (bg-fetcher drain).
    pub fn drain_bg_fetches(&self) -> HashMap<DocKey, BgFetchCtx> {
        std::mem::take(&mut *self.pending_bg_fetches.lock())
    }

    /// True when fetches are waiting for the bg-fetcher.
    pub fn has_pending_bg_fetches(&self) -> bool {
        !self.pending_bg_fetches.lock().is_empty()
    }

    /// Completes one background fetch against the hash table.
    ///
    /// Mirrors the storage outcome into the entry: restore the value,
    /// record non-existence (translated to success under full eviction so
    /// the worker re-drives and sees the authoritative miss), or report a
    /// transient failure when storage errored.
    pub fn complete_bg_fetch_for_item(
        &self,
        key: &DocKey,
        meta_only: bool,
        fetch_status: Status,
        fetched: Option<&Item>,
        init_time_us: u64,
        start_time_us: u64,
    ) -> Status {
        let mut status = fetch_status;
        {
            let _state = self.state.read();
            let mut guard = self.ht.lock_bucket(key);
            let pos = self.fetch_valid_value(
                &mut guard,
                key,
                WantsDeleted::Yes,
                TrackReference::Yes,
                QueueExpired::Yes,
            );

            if meta_only {
                let restored = match (pos, fetched) {
                    (Some(p), Some(item)) => guard.restore_meta(p, item),
                    _ => false,
                };
                // A temp entry removed before the fetch returned (racing
                // fetches) still reports success so the worker re-drives
                // and resolves the correct flow.
                if restored || status == Status::KeyNoent {
                    status = Status::Success;
                }
            } else if let Some(p) = pos {
                let (resident, temp) = {
                    let entry = guard.entry(p);
                    (entry.is_resident(), entry.is_temp_initial())
                };
                let restore = if resident {
                    status = Status::Success;
                    false
                } else {
                    match self.eviction {
                        EvictionPolicy::ValueOnly => true,
                        EvictionPolicy::FullEviction => temp || !resident,
                    }
                };
                if restore {
                    match (status, fetched) {
                        (Status::Success, Some(item)) => {
                            guard.restore_value(p, item);
                            debug_assert!(guard.entry(p).is_resident());
                        }
                        (Status::KeyNoent, _) => {
                            guard.entry_mut(p).set_non_existent();
                            if self.eviction == EvictionPolicy::FullEviction {
                                status = Status::Success;
                            }
                        }
                        _ => {
                            warn!(
                                vb = %self.id,
                                seqno = guard.entry(p).seqno(),
                                ?status,
                                "failed background fetch"
                            );
                            status = Status::TmpFail;
                        }
                    }
                }
            }
        }

        if meta_only {
            self.stats.bg_meta_fetched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.bg_fetched.fetch_add(1, Ordering::Relaxed);
        }
        self.update_bg_stats(init_time_us, start_time_us, self.clock.now_micros());
        status
    }

    fn update_bg_stats(&self, init_us: u64, start_us: u64, stop_us: u64) {
        if stop_us >= start_us && start_us >= init_us {
            self.stats.bg_num_operations.fetch_add(1, Ordering::Relaxed);
            self.stats.bg_wait_total_us.fetch_add(start_us - init_us, Ordering::Relaxed);
            self.stats.bg_load_total_us.fetch_add(stop_us - start_us, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // High-priority persistence waiters
    // ------------------------------------------------------------------

    /// Registers a cookie waiting on seqno or checkpoint persistence.
    pub fn add_high_priority(&self, id: u64, cookie: CookieId, notify: HighPriorityNotify) {
        let mut waiters = self.hp_waiters.lock();
        self.stats.high_priority_requests.fetch_add(1, Ordering::Relaxed);
        waiters.push(HighPriorityEntry {
            cookie,
            id,
            by_seqno: notify == HighPriorityNotify::Seqno,
            start_us: self.clock.now_micros(),
        });
        self.num_hp_chks.store(waiters.len(), Ordering::Relaxed);
    }

    /// Reports a persistence advance and resolves matching waiters.
    ///
    /// Waiters whose target is covered by `id_num` get `Success`; waiters
    /// that outlived the adaptive flush timeout get `TmpFail`. The
    /// timeout window adapts to the observed wall time.
    pub fn notify_on_persistence(&self, id_num: u64, notify: HighPriorityNotify) {
        let by_seqno = notify == HighPriorityNotify::Seqno;
        let now_us = self.clock.now_micros();
        let mut to_notify: Vec<(CookieId, Status)> = Vec::new();
        {
            let mut waiters = self.hp_waiters.lock();
            waiters.retain(|entry| {
                if entry.by_seqno != by_seqno {
                    return true;
                }
                let spent_secs = now_us.saturating_sub(entry.start_us) / 1_000_000;
                if entry.id <= id_num {
                    self.adjust_chk_flush_timeout(spent_secs);
                    info!(
                        vb = %self.id,
                        kind = notify.as_str(),
                        waiting_for = entry.id,
                        persisted_upto = id_num,
                        cookie = %entry.cookie,
                        "notified persistence completion"
                    );
                    to_notify.push((entry.cookie, Status::Success));
                    self.stats.high_priority_requests.fetch_sub(1, Ordering::Relaxed);
                    false
                } else if spent_secs > self.chk_flush_timeout_secs() {
                    self.adjust_chk_flush_timeout(spent_secs);
                    warn!(
                        vb = %self.id,
                        kind = notify.as_str(),
                        waiting_for = entry.id,
                        persisted_upto = id_num,
                        cookie = %entry.cookie,
                        "notified persistence timeout"
                    );
                    to_notify.push((entry.cookie, Status::TmpFail));
                    self.stats.high_priority_requests.fetch_sub(1, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            });
            self.num_hp_chks.store(waiters.len(), Ordering::Relaxed);
        }
        for (cookie, status) in to_notify {
            self.notifier.notify_io_complete(cookie, status);
        }
    }

    /// Fails every waiter and cancels pending fetches, then resolves the
    /// parked operations per the current state.
    pub fn notify_all_pending_failed(&self) {
        let mut to_notify: Vec<(CookieId, Status)> = Vec::new();
        {
            let mut waiters = self.hp_waiters.lock();
            for entry in waiters.drain(..) {
                to_notify.push((entry.cookie, Status::TmpFail));
                self.stats.high_priority_requests.fetch_sub(1, Ordering::Relaxed);
            }
            self.num_hp_chks.store(0, Ordering::Relaxed);
        }
        {
            let mut pending = self.pending_bg_fetches.lock();
            let mut cancelled = 0usize;
            for (_, ctx) in pending.drain() {
                for fetch in ctx.items {
                    to_notify.push((fetch.cookie, Status::NotMyVbucket));
                    cancelled += 1;
                }
            }
            if cancelled > 0 {
                let mut remaining = self.stats.num_remaining_bg_items.load(Ordering::Relaxed);
                loop {
                    let next = remaining.saturating_sub(cancelled);
                    match self.stats.num_remaining_bg_items.compare_exchange_weak(
                        remaining,
                        next,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(observed) => remaining = observed,
                    }
                }
            }
        }
        for (cookie, status) in to_notify {
            self.notifier.notify_io_complete(cookie, status);
        }
        self.fire_all_ops_for_state();
    }

    fn adjust_chk_flush_timeout(&self, wall_secs: u64) {
        let middle = (self.flush_timeout_min_secs + self.flush_timeout_max_secs) / 2;
        let new = if wall_secs <= self.flush_timeout_min_secs {
            self.flush_timeout_min_secs
        } else if wall_secs <= middle {
            middle
        } else {
            self.flush_timeout_max_secs
        };
        self.stats.chk_flush_timeout_secs.store(new, Ordering::Relaxed);
    }

    /// Current adaptive checkpoint-flush timeout in seconds.
    pub fn chk_flush_timeout_secs(&self) -> u64 {
        let configured = self.stats.chk_flush_timeout_secs.load(Ordering::Relaxed);
        if configured == 0 { self.flush_timeout_min_secs } else { configured }
    }

    /// Number of registered high-priority waiters.
    pub fn high_priority_size(&self) -> usize {
        self.num_hp_chks.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Bloom filters
    // ------------------------------------------------------------------

    /// Creates the main bloom filter (bucket creation, rebalance).
    pub fn create_filter(&self, key_count: usize, probability: f64) {
        if !self.filters.lock().create(key_count, probability) {
            warn!(vb = %self.id, "bloom filter / temp filter already exist");
        }
    }

    /// Creates the temp filter for an in-progress compaction.
    pub fn init_temp_filter(&self, key_count: usize, probability: f64) {
        self.filters.lock().init_temp(key_count, probability);
    }

    /// Records a key insertion in the filter pair.
    pub fn add_to_filter(&self, key: &DocKey) {
        self.filters.lock().add_key(key);
    }

    /// Records a key seen by the compaction visitor.
    pub fn add_to_temp_filter(&self, key: &DocKey) {
        self.filters.lock().add_key_to_temp(key);
    }

    /// Consults the existence hint for `key`.
    pub fn maybe_key_exists_in_filter(&self, key: &DocKey) -> bool {
        self.filters.lock().maybe_key_exists(key)
    }

    /// True when a usable temp filter exists.
    pub fn is_temp_filter_available(&self) -> bool {
        self.filters.lock().temp_available()
    }

    /// Promotes the temp filter after compaction.
    pub fn swap_filter(&self) {
        self.filters.lock().swap();
    }

    /// Drops both filters.
    pub fn clear_filter(&self) {
        self.filters.lock().clear();
    }

    /// Applies a status to both filters.
    pub fn set_filter_status(&self, status: FilterStatus) {
        self.filters.lock().set_status(status);
    }

    /// Filter status string for stats.
    pub fn filter_status_string(&self) -> &'static str {
        self.filters.lock().status_string()
    }

    /// Main filter size in bytes.
    pub fn filter_size(&self) -> usize {
        self.filters.lock().filter_size()
    }

    /// Keys recorded in the main filter.
    pub fn num_keys_in_filter(&self) -> usize {
        self.filters.lock().key_count()
    }

    // ------------------------------------------------------------------
    // Counters and stats
    // ------------------------------------------------------------------

    /// Item count per the eviction policy's notion of "item".
    pub fn num_items(&self, policy: EvictionPolicy) -> usize {
        match policy {
            EvictionPolicy::ValueOnly => self.ht.num_in_memory_items(),
            EvictionPolicy::FullEviction => self.ht.num_items(),
        }
    }

    /// Non-resident item count per the eviction policy.
    pub fn num_non_resident_items(&self, policy: EvictionPolicy) -> usize {
        match policy {
            EvictionPolicy::ValueOnly => self.ht.num_non_resident_items(),
            EvictionPolicy::FullEviction => {
                let num_items = self.ht.num_items();
                let resident =
                    self.ht.num_in_memory_items() - self.ht.num_non_resident_items();
                num_items.saturating_sub(resident)
            }
        }
    }

    /// Resident-ratio check used by the full-eviction pager.
    pub fn is_resident_ratio_under_threshold(&self, threshold: f64) -> bool {
        debug_assert_eq!(self.eviction, EvictionPolicy::FullEviction);
        let num_items = self.num_items(EvictionPolicy::FullEviction);
        if num_items == 0 {
            return false;
        }
        let non_resident = self.num_non_resident_items(EvictionPolicy::FullEviction);
        let resident_ratio = (num_items - non_resident) as f64 / num_items as f64;
        threshold >= resident_ratio
    }

    /// Records a creating mutation.
    pub fn incr_ops_create(&self) {
        self.ops_create.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an updating mutation.
    pub fn incr_ops_update(&self) {
        self.ops_update.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a deletion.
    pub fn incr_ops_delete(&self) {
        self.ops_delete.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected operation.
    pub fn incr_ops_reject(&self) {
        self.ops_reject.fetch_add(1, Ordering::Relaxed);
    }

    /// Purge seqno (tombstones removed up to here).
    pub fn purge_seqno(&self) -> u64 {
        self.purge_seqno.load(Ordering::Relaxed)
    }

    /// Sets the purge seqno.
    pub fn set_purge_seqno(&self, seqno: u64) {
        self.purge_seqno.store(seqno, Ordering::Relaxed);
    }

    /// Items discarded by rollback.
    pub fn rollback_item_count(&self) -> u64 {
        self.rollback_item_count.load(Ordering::Relaxed)
    }

    /// Adds to the rollback item count.
    pub fn incr_rollback_item_count(&self, by: u64) {
        self.rollback_item_count.fetch_add(by, Ordering::Relaxed);
    }

    /// Checkpoint id the persistence layer has fully flushed.
    pub fn persistence_checkpoint_id(&self) -> u64 {
        self.persistence_checkpoint_id.load(Ordering::Relaxed)
    }

    /// Sets the persisted checkpoint id.
    pub fn set_persistence_checkpoint_id(&self, id: u64) {
        self.persistence_checkpoint_id.store(id, Ordering::Relaxed);
    }

    /// Highest persisted seqno.
    pub fn persistence_seqno(&self) -> u64 {
        self.persistence_seqno.load(Ordering::Relaxed)
    }

    /// Raises the highest persisted seqno.
    pub fn set_persistence_seqno(&self, seqno: u64) {
        self.persistence_seqno.fetch_max(seqno, Ordering::Relaxed);
    }

    /// Last fully persisted snapshot range.
    pub fn persisted_snapshot(&self) -> SnapshotRange {
        *self.persisted_snapshot.lock()
    }

    /// Records a fully persisted snapshot range.
    pub fn set_persisted_snapshot(&self, range: SnapshotRange) {
        *self.persisted_snapshot.lock() = range;
    }

    /// Items expired from this partition.
    pub fn num_expired_items(&self) -> u64 {
        self.num_expired.load(Ordering::Relaxed)
    }

    /// Clears operation counters, dirty-queue gauges and HLC drift stats.
    pub fn reset_stats(&self) {
        self.ops_create.store(0, Ordering::Relaxed);
        self.ops_update.store(0, Ordering::Relaxed);
        self.ops_delete.store(0, Ordering::Relaxed);
        self.ops_reject.store(0, Ordering::Relaxed);
        self.dirty_queue_size.store(0, Ordering::Relaxed);
        self.dirty_queue_mem.store(0, Ordering::Relaxed);
        self.dirty_queue_fill.store(0, Ordering::Relaxed);
        self.dirty_queue_drain.store(0, Ordering::Relaxed);
        self.dirty_queue_age.store(0, Ordering::Relaxed);
        self.dirty_queue_pending_writes.store(0, Ordering::Relaxed);
        self.hlc.reset_stats();
    }

    /// Emits this partition's stats through `add`.
    pub fn add_stats(&self, details: bool, add: &mut dyn FnMut(&str, String)) {
        add("state", self.state().to_string());
        if !details {
            return;
        }
        let policy = self.eviction;
        add("num_items", self.num_items(policy).to_string());
        add("num_temp_items", self.ht.num_temp_items().to_string());
        add("num_non_resident", self.num_non_resident_items(policy).to_string());
        add("ht_memory", self.ht.memory_size().to_string());
        add("num_ejects", self.ht.num_ejects().to_string());
        add("ops_create", self.ops_create.load(Ordering::Relaxed).to_string());
        add("ops_update", self.ops_update.load(Ordering::Relaxed).to_string());
        add("ops_delete", self.ops_delete.load(Ordering::Relaxed).to_string());
        add("ops_reject", self.ops_reject.load(Ordering::Relaxed).to_string());
        add("queue_size", self.dirty_queue_size.load(Ordering::Relaxed).to_string());
        add("queue_memory", self.dirty_queue_mem.load(Ordering::Relaxed).to_string());
        add("queue_fill", self.dirty_queue_fill.load(Ordering::Relaxed).to_string());
        add("queue_drain", self.dirty_queue_drain.load(Ordering::Relaxed).to_string());
        add("queue_age", self.dirty_queue_age.load(Ordering::Relaxed).to_string());
        add(
            "pending_writes",
            self.dirty_queue_pending_writes.load(Ordering::Relaxed).to_string(),
        );
        add("high_seqno", self.high_seqno().to_string());
        add("uuid", self.failover.latest_uuid().to_string());
        add("purge_seqno", self.purge_seqno().to_string());
        add("bloom_filter", self.filter_status_string().to_string());
        add("bloom_filter_size", self.filter_size().to_string());
        add("bloom_filter_key_count", self.num_keys_in_filter().to_string());
        add("rollback_item_count", self.rollback_item_count().to_string());
        add("max_cas", self.hlc.max_cas().to_string());
        let drift = self.hlc.drift_stats();
        add("drift_ahead_exceptions", drift.ahead_exceptions.to_string());
        add("drift_behind_exceptions", drift.behind_exceptions.to_string());
        debug!(vb = %self.id, "emitted vbucket stats");
    }
}

fn saturating_sub(counter: &AtomicU64, by: u64) {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let next = current.saturating_sub(by);
        match counter.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}
