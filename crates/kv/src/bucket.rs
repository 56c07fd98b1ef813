//! Bucket registry and engine facade.
//!
//! A [`Bucket`] owns every partition of one logical bucket and fronts the
//! data plane for protocol workers: store/get/delete with quota checks,
//! bloom-filter shortcuts and background-fetch parking, plus the
//! flusher-, bg-fetcher- and pager-facing entry points the background
//! tasks drive.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use driftkv_types::clock::WallClock;
use driftkv_types::config::{ConfigError, KvConfig};
use driftkv_types::key::DocKey;
use driftkv_types::{
    CookieId, EvictionPolicy, GenerateBySeqno, GenerateCas, QueueExpired, Status, StoreOperation,
    TrackReference, VbState, Vbid, WantsDeleted,
};
use tracing::{debug, info};

use crate::checkpoint::{QueueOp, PERSISTENCE_CURSOR};
use crate::collections::ManifestError;
use crate::kvstore::KvStore;
use crate::notify::IoNotifier;
use crate::stats::KvStats;
use crate::stored_value::{Item, StoredValue, MAX_NRU};
use crate::vbucket::{BgFetchItem, ExpireBy, HighPriorityNotify, VBucket};

/// Options for a get operation.
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Refresh the entry's NRU reference age.
    pub track_reference: bool,
    /// Queue a background fetch when the value is not resident.
    pub queue_bg_fetch: bool,
    /// Reject the read when the partition is not active.
    pub honor_states: bool,
    /// Queue expired entries for deletion on access.
    pub queue_expired: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { track_reference: true, queue_bg_fetch: true, honor_states: true, queue_expired: true }
    }
}

/// Result of a get operation.
#[derive(Debug, Clone)]
pub struct GetResult {
    /// Outcome.
    pub status: Status,
    /// The materialised item on success.
    pub item: Option<Item>,
}

impl GetResult {
    fn status(status: Status) -> Self {
        Self { status, item: None }
    }
}

/// Result of a store operation.
#[derive(Debug, Clone, Copy)]
pub struct StoreResult {
    /// Outcome.
    pub status: Status,
    /// CAS of the stored item on success.
    pub cas: u64,
    /// Seqno of the stored item on success.
    pub seqno: i64,
}

impl StoreResult {
    fn failed(status: Status) -> Self {
        Self { status, cas: 0, seqno: 0 }
    }
}

/// All partitions of one logical bucket.
pub struct Bucket {
    config: KvConfig,
    eviction: EvictionPolicy,
    vbuckets: Vec<Arc<VBucket>>,
    stats: Arc<KvStats>,
    clock: Arc<WallClock>,
    notifier: Arc<dyn IoNotifier>,
    store: Arc<dyn KvStore>,
}

impl Bucket {
    /// Creates a bucket with every partition in the dead state.
    pub fn new(
        config: KvConfig,
        eviction: EvictionPolicy,
        clock: Arc<WallClock>,
        notifier: Arc<dyn IoNotifier>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = Arc::new(KvStats::new(&config.quota));
        stats
            .chk_flush_timeout_secs
            .store(config.checkpoint.flush_timeout_min_secs, Ordering::Relaxed);
        let vbuckets = (0..config.max_vbuckets)
            .map(|i| {
                Arc::new(VBucket::new(
                    Vbid::new(i),
                    VbState::Dead,
                    &config,
                    eviction,
                    Arc::clone(&stats),
                    Arc::clone(&clock),
                    Arc::clone(&notifier),
                    0,
                    driftkv_types::SnapshotRange::default(),
                    0,
                ))
            })
            .collect();
        info!(
            vbuckets = config.max_vbuckets,
            shards = config.max_num_shards,
            backend = %config.backend,
            "created bucket"
        );
        Ok(Self { config, eviction, vbuckets, stats, clock, notifier, store })
    }

    /// Bucket configuration.
    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<KvStats> {
        &self.stats
    }

    /// Shared wall clock.
    pub fn clock(&self) -> &Arc<WallClock> {
        &self.clock
    }

    /// Eviction policy in force.
    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Number of partitions.
    pub fn num_vbuckets(&self) -> usize {
        self.vbuckets.len()
    }

    /// Partition accessor.
    pub fn vbucket(&self, vbid: Vbid) -> Option<&Arc<VBucket>> {
        self.vbuckets.get(usize::from(vbid.value()))
    }

    /// Transitions a partition's state.
    pub fn set_vbucket_state(&self, vbid: Vbid, state: VbState) -> Status {
        match self.vbucket(vbid) {
            Some(vb) => {
                vb.set_state(state);
                Status::Success
            }
            None => Status::NotMyVbucket,
        }
    }

    /// UUID of the partition's newest failover entry.
    pub fn vbucket_uuid(&self, vbid: Vbid) -> Option<u64> {
        self.vbucket(vbid).map(|vb| vb.failover().latest_uuid())
    }

    fn active_vbucket(&self, vbid: Vbid, cookie: CookieId) -> Result<&Arc<VBucket>, Status> {
        let vb = self.vbucket(vbid).ok_or(Status::NotMyVbucket)?;
        match vb.state() {
            VbState::Active => Ok(vb),
            VbState::Pending => {
                vb.add_pending_op(cookie);
                Err(Status::WouldBlock)
            }
            VbState::Replica | VbState::Dead => Err(Status::NotMyVbucket),
        }
    }

    // ------------------------------------------------------------------
    // Client operations
    // ------------------------------------------------------------------

    /// Stores an item under the requested operation semantics.
    ///
    /// Quota exhaustion surfaces as `TmpFail` (the pager has already been
    /// signalled by the memory condition); conditional failures surface
    /// as `NotStored` for the caller to remap per opcode.
    pub fn store(&self, item: &Item, operation: StoreOperation, cookie: CookieId) -> StoreResult {
        let vb = match self.active_vbucket(item.vbid, cookie) {
            Ok(vb) => vb,
            Err(status) => return StoreResult::failed(status),
        };
        if !vb.manifest().does_key_contain_valid_collection(&item.key) {
            vb.incr_ops_reject();
            return StoreResult::failed(Status::KeyNoent);
        }

        let footprint =
            std::mem::size_of::<StoredValue>() + item.key.len() + item.value.len();
        if !self.stats.has_memory_for(footprint) {
            vb.incr_ops_reject();
            return StoreResult::failed(Status::Enomem.remap_enomem_to_tmpfail());
        }

        let mut guard = vb.ht().lock_bucket(&item.key);
        let pos = vb.fetch_valid_value(
            &mut guard,
            &item.key,
            WantsDeleted::Yes,
            TrackReference::No,
            QueueExpired::Yes,
        );
        let live = pos.filter(|&p| {
            let entry = guard.entry(p);
            !entry.is_deleted() && !entry.is_temp_initial() && !entry.is_non_existent()
        });

        enum Action {
            Create,
            Update(usize),
            UpdateMerged(usize, Vec<u8>),
        }

        let action = match operation {
            StoreOperation::Cas => match live {
                None => return StoreResult::failed(Status::KeyNoent),
                Some(p) if guard.entry(p).cas() != item.cas => {
                    return StoreResult::failed(Status::KeyExists);
                }
                Some(p) => Action::Update(p),
            },
            StoreOperation::Set => match live {
                Some(p) => Action::Update(p),
                None => Action::Create,
            },
            StoreOperation::Add => match live {
                Some(_) => return StoreResult::failed(Status::NotStored),
                None => Action::Create,
            },
            StoreOperation::Replace => match live {
                Some(p) => Action::Update(p),
                None => return StoreResult::failed(Status::NotStored),
            },
            StoreOperation::Append | StoreOperation::Prepend => match live {
                None => return StoreResult::failed(Status::NotStored),
                Some(p) => {
                    let (entry_cas, existing) = {
                        let entry = guard.entry(p);
                        (entry.cas(), entry.value().map(<[u8]>::to_vec))
                    };
                    if item.cas != 0 && entry_cas != item.cas {
                        return StoreResult::failed(Status::KeyExists);
                    }
                    let Some(existing) = existing else {
                        drop(guard);
                        return self.park_bg_fetch(vb, &item.key, cookie, false);
                    };
                    let mut merged =
                        Vec::with_capacity(existing.len() + item.value.len());
                    if operation == StoreOperation::Append {
                        merged.extend_from_slice(&existing);
                        merged.extend_from_slice(&item.value);
                    } else {
                        merged.extend_from_slice(&item.value);
                        merged.extend_from_slice(&existing);
                    }
                    Action::UpdateMerged(p, merged)
                }
            },
        };

        let (pos, created) = match action {
            Action::Create => {
                let p = match pos {
                    // Re-create over a tombstone or placeholder.
                    Some(p) => {
                        guard.update_value(p, item);
                        p
                    }
                    None => guard.insert(StoredValue::from_item(item)),
                };
                (p, true)
            }
            Action::Update(p) => {
                guard.update_value(p, item);
                (p, false)
            }
            Action::UpdateMerged(p, merged) => {
                let mut merged_item = item.clone();
                merged_item.value = merged;
                guard.update_value(p, &merged_item);
                (p, false)
            }
        };

        let result =
            vb.queue_dirty(guard.entry_mut(pos), GenerateBySeqno::Yes, GenerateCas::Yes);
        drop(guard);

        if created {
            vb.incr_ops_create();
            vb.add_to_filter(&item.key);
        } else {
            vb.incr_ops_update();
        }
        StoreResult { status: Status::Success, cas: result.cas, seqno: result.seqno }
    }

    /// Soft-deletes a key.
    pub fn delete(&self, key: &DocKey, vbid: Vbid, cas: u64, cookie: CookieId) -> StoreResult {
        let vb = match self.active_vbucket(vbid, cookie) {
            Ok(vb) => vb,
            Err(status) => return StoreResult::failed(status),
        };
        if !vb.manifest().does_key_contain_valid_collection(key) {
            return StoreResult::failed(Status::KeyNoent);
        }
        let mut guard = vb.ht().lock_bucket(key);
        let pos = vb.fetch_valid_value(
            &mut guard,
            key,
            WantsDeleted::No,
            TrackReference::No,
            QueueExpired::Yes,
        );
        let Some(pos) = pos else {
            return StoreResult::failed(Status::KeyNoent);
        };
        if cas != 0 && guard.entry(pos).cas() != cas {
            return StoreResult::failed(Status::KeyExists);
        }
        guard.soft_delete(pos);
        let result =
            vb.queue_dirty(guard.entry_mut(pos), GenerateBySeqno::Yes, GenerateCas::Yes);
        drop(guard);
        vb.incr_ops_delete();
        StoreResult { status: Status::Success, cas: result.cas, seqno: result.seqno }
    }

    /// Reads a key.
    pub fn get(&self, key: &DocKey, vbid: Vbid, cookie: CookieId, options: GetOptions) -> GetResult {
        let vb = if options.honor_states {
            match self.active_vbucket(vbid, cookie) {
                Ok(vb) => vb,
                Err(status) => return GetResult::status(status),
            }
        } else {
            match self.vbucket(vbid) {
                Some(vb) => vb,
                None => return GetResult::status(Status::NotMyVbucket),
            }
        };
        // Reads consult the manifest: a key in a collection that is not
        // open is simply absent.
        if !vb.manifest().does_key_contain_valid_collection(key) {
            return GetResult::status(Status::KeyNoent);
        }

        let mut guard = vb.ht().lock_bucket(key);
        let track = if options.track_reference { TrackReference::Yes } else { TrackReference::No };
        let expired = if options.queue_expired { QueueExpired::Yes } else { QueueExpired::No };
        let pos = vb.fetch_valid_value(&mut guard, key, WantsDeleted::No, track, expired);

        match pos {
            Some(pos) => {
                let (non_existent, temp, resident) = {
                    let entry = guard.entry(pos);
                    (entry.is_non_existent(), entry.is_temp_initial(), entry.is_resident())
                };
                if non_existent {
                    guard.erase(pos);
                    return GetResult::status(Status::KeyNoent);
                }
                if temp || !resident {
                    drop(guard);
                    if !options.queue_bg_fetch {
                        return GetResult::status(Status::KeyNoent);
                    }
                    let parked = self.park_bg_fetch(vb, key, cookie, false);
                    return GetResult::status(parked.status);
                }
                GetResult { status: Status::Success, item: Some(guard.entry(pos).to_item(vbid)) }
            }
            None => match self.eviction {
                EvictionPolicy::ValueOnly => GetResult::status(Status::KeyNoent),
                EvictionPolicy::FullEviction => {
                    if options.queue_bg_fetch && vb.maybe_key_exists_in_filter(key) {
                        guard.insert(StoredValue::temp_initial(key.clone()));
                        drop(guard);
                        let parked = self.park_bg_fetch(vb, key, cookie, false);
                        GetResult::status(parked.status)
                    } else {
                        GetResult::status(Status::KeyNoent)
                    }
                }
            },
        }
    }

    fn park_bg_fetch(
        &self,
        vb: &Arc<VBucket>,
        key: &DocKey,
        cookie: CookieId,
        meta_only: bool,
    ) -> StoreResult {
        vb.queue_bg_fetch(
            key.clone(),
            BgFetchItem { cookie, init_time_us: self.clock.now_micros(), meta_only },
        );
        debug!(vb = %vb.id(), key = %key, "parked operation on background fetch");
        StoreResult::failed(Status::WouldBlock)
    }

    /// Applies a new collections manifest to every active partition.
    pub fn update_collections_manifest(&self, json: &str) -> Result<(), ManifestError> {
        for vb in &self.vbuckets {
            if vb.state() == VbState::Active {
                vb.manifest().update(vb, json)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Background task entry points
    // ------------------------------------------------------------------

    /// Drains one partition's pending background fetches.
    ///
    /// Returns the number of fetch requests completed.
    pub fn run_bg_fetcher(&self, vbid: Vbid) -> usize {
        let Some(vb) = self.vbucket(vbid) else {
            return 0;
        };
        let pending = vb.drain_bg_fetches();
        let mut completed = 0;
        for (key, ctx) in pending {
            let fetched = self.store.fetch(vbid, &key);
            let start_us = self.clock.now_micros();
            for fetch in ctx.items {
                let status = vb.complete_bg_fetch_for_item(
                    &key,
                    fetch.meta_only,
                    fetched.status,
                    fetched.item.as_ref(),
                    fetch.init_time_us,
                    start_us,
                );
                self.notifier.notify_io_complete(fetch.cookie, status);
                completed += 1;
            }
        }
        if completed > 0 {
            let mut remaining = self.stats.num_remaining_bg_items.load(Ordering::Relaxed);
            loop {
                let next = remaining.saturating_sub(completed);
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
        completed
    }

    /// Drains one partition's persistence cursor to the backend.
    ///
    /// Advances the persisted snapshot, seqno and checkpoint id, fires
    /// persistence notifications, and returns the number of items
    /// flushed.
    pub fn flush_vbucket(&self, vbid: Vbid) -> usize {
        let Some(vb) = self.vbucket(vbid) else {
            return 0;
        };
        let items = vb.checkpoint_manager().get_items_for_cursor(PERSISTENCE_CURSOR);
        if items.is_empty() {
            return 0;
        }
        let mut high: i64 = 0;
        for item in &items {
            if item.op() == QueueOp::Mutation {
                self.store.persist(item);
            }
            vb.stats_for_flushing(item.size(), item.value().len(), item.queued_time_secs());
            self.stats.tot_flushed.fetch_add(1, Ordering::Relaxed);
            high = high.max(item.seqno());
        }
        if self.config.collections_prototype_enabled {
            self.store.persist_manifest(vbid, vb.manifest().to_serialized_value());
        }

        vb.set_persistence_seqno(high.max(0) as u64);
        vb.set_persisted_snapshot(vb.checkpoint_manager().snapshot_range());
        let persisted_ckpt = vb.checkpoint_manager().open_checkpoint_id().saturating_sub(1);
        vb.set_persistence_checkpoint_id(persisted_ckpt);

        vb.notify_on_persistence(vb.persistence_seqno(), HighPriorityNotify::Seqno);
        vb.notify_on_persistence(persisted_ckpt, HighPriorityNotify::CheckpointPersistence);
        debug!(vb = %vbid, flushed = items.len(), high_seqno = high, "flushed vbucket");
        items.len()
    }

    /// One expiry pager cycle: deletes expired items on active partitions.
    ///
    /// Returns the number of items expired.
    pub fn run_expiry_pager(&self) -> usize {
        let now = self.clock.now_secs();
        let mut expired = 0;
        for vb in &self.vbuckets {
            if vb.state() != VbState::Active {
                continue;
            }
            for index in 0..vb.ht().size() {
                let mut guard = vb.ht().lock_bucket_at(index);
                for pos in 0..guard.len() {
                    let is_candidate = {
                        let entry = guard.entry(pos);
                        !entry.is_deleted() && !entry.is_temp_initial() && entry.is_expired(now)
                    };
                    if is_candidate {
                        vb.inc_expiration_stat(ExpireBy::Pager);
                        guard.soft_delete(pos);
                        vb.queue_dirty(
                            guard.entry_mut(pos),
                            GenerateBySeqno::Yes,
                            GenerateCas::Yes,
                        );
                        expired += 1;
                    }
                }
            }
        }
        if expired > 0 {
            info!(count = expired, "expiry pager removed expired items");
        }
        expired
    }

    /// One item pager cycle: frees memory down to the low watermark.
    ///
    /// Expired items go first, then items by descending NRU age. Only
    /// active partitions are visited; replicas are never paged, so their
    /// history cannot diverge from the active's.
    pub fn run_item_pager(&self) -> usize {
        let target = self.stats.mem_low_wat();
        if target == 0 || self.stats.mem_used() <= target {
            return 0;
        }

        let mut paged = self.run_expiry_pager();

        let mut nru_threshold = MAX_NRU;
        loop {
            if self.stats.mem_used() <= target {
                break;
            }
            for vb in &self.vbuckets {
                if vb.state() != VbState::Active || self.stats.mem_used() <= target {
                    continue;
                }
                for index in 0..vb.ht().size() {
                    if self.stats.mem_used() <= target {
                        break;
                    }
                    let mut guard = vb.ht().lock_bucket_at(index);
                    for pos in 0..guard.len() {
                        if self.stats.mem_used() <= target {
                            break;
                        }
                        let is_candidate = {
                            let entry = guard.entry(pos);
                            !entry.is_deleted()
                                && !entry.is_temp_initial()
                                && entry.is_resident()
                                && entry.nru() >= nru_threshold
                        };
                        if is_candidate {
                            guard.soft_delete(pos);
                            vb.queue_dirty(
                                guard.entry_mut(pos),
                                GenerateBySeqno::Yes,
                                GenerateCas::Yes,
                            );
                            paged += 1;
                        }
                    }
                }
            }
            if nru_threshold == 0 {
                break;
            }
            nru_threshold -= 1;
        }
        if paged > 0 {
            info!(count = paged, mem_used = self.stats.mem_used(), "item pager cycle complete");
        }
        paged
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use driftkv_types::config::QuotaConfig;
    use driftkv_types::datatype::Datatype;

    use super::*;
    use crate::kvstore::MemoryKvStore;
    use crate::notify::CollectingNotifier;

    fn bucket_with_quota(max_size: usize) -> (Bucket, Arc<CollectingNotifier>, Arc<WallClock>) {
        let quota = QuotaConfig { max_size, mem_low_wat: 0, mem_high_wat: 0 };
        let config = KvConfig::builder()
            .max_vbuckets(2)
            .ht_size(47)
            .quota(quota)
            .build()
            .expect("valid config");
        let clock = Arc::new(WallClock::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let store_config = driftkv_types::config::KvStoreConfig::from_config(&config, 0);
        let store = Arc::new(MemoryKvStore::new(store_config));
        let bucket = Bucket::new(
            config,
            EvictionPolicy::ValueOnly,
            Arc::clone(&clock),
            notifier.clone() as Arc<dyn IoNotifier>,
            store as Arc<dyn KvStore>,
        )
        .expect("valid bucket");
        bucket.set_vbucket_state(Vbid::new(0), VbState::Active);
        (bucket, notifier, clock)
    }

    fn bucket() -> (Bucket, Arc<CollectingNotifier>, Arc<WallClock>) {
        bucket_with_quota(0)
    }

    fn item(key: &[u8], value: &[u8]) -> Item {
        Item::new(
            DocKey::default_collection(key.to_vec()),
            Vbid::new(0),
            value.to_vec(),
            0,
            0,
            Datatype::RAW,
        )
    }

    fn cookie() -> CookieId {
        CookieId::new(1)
    }

    #[test]
    fn test_set_creates_then_updates() {
        let (bucket, _, _) = bucket();
        let first = bucket.store(&item(b"k", b"v1"), StoreOperation::Set, cookie());
        assert_eq!(first.status, Status::Success);
        assert_eq!(first.seqno, 1);

        let second = bucket.store(&item(b"k", b"v2"), StoreOperation::Set, cookie());
        assert_eq!(second.status, Status::Success);
        assert_eq!(second.seqno, 2);
        assert!(second.cas > first.cas, "CAS must advance on every mutation");

        let result = bucket.get(
            &DocKey::default_collection(b"k".to_vec()),
            Vbid::new(0),
            cookie(),
            GetOptions::default(),
        );
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.item.unwrap().value, b"v2");
    }

    #[test]
    fn test_add_fails_on_existing_key() {
        let (bucket, _, _) = bucket();
        bucket.store(&item(b"k", b"v"), StoreOperation::Set, cookie());
        let result = bucket.store(&item(b"k", b"v2"), StoreOperation::Add, cookie());
        assert_eq!(result.status, Status::NotStored);
        assert_eq!(
            result.status.remap_not_stored(StoreOperation::Add),
            Status::KeyExists
        );
    }

    #[test]
    fn test_add_succeeds_over_tombstone() {
        let (bucket, _, _) = bucket();
        bucket.store(&item(b"k", b"v"), StoreOperation::Set, cookie());
        bucket.delete(&DocKey::default_collection(b"k".to_vec()), Vbid::new(0), 0, cookie());
        let result = bucket.store(&item(b"k", b"v2"), StoreOperation::Add, cookie());
        assert_eq!(result.status, Status::Success);
    }

    #[test]
    fn test_replace_requires_existing_key() {
        let (bucket, _, _) = bucket();
        let result = bucket.store(&item(b"k", b"v"), StoreOperation::Replace, cookie());
        assert_eq!(result.status, Status::NotStored);
        assert_eq!(
            result.status.remap_not_stored(StoreOperation::Replace),
            Status::KeyNoent
        );
    }

    #[test]
    fn test_cas_store_semantics() {
        let (bucket, _, _) = bucket();
        let stored = bucket.store(&item(b"k", b"v"), StoreOperation::Set, cookie());

        // Correct CAS succeeds and mints a newer CAS.
        let mut with_cas = item(b"k", b"v2");
        with_cas.cas = stored.cas;
        let second = bucket.store(&with_cas, StoreOperation::Cas, cookie());
        assert_eq!(second.status, Status::Success);
        assert!(second.cas > stored.cas);

        // The stale CAS now fails.
        let stale = bucket.store(&with_cas, StoreOperation::Cas, cookie());
        assert_eq!(stale.status, Status::KeyExists);

        // CAS against a missing key reports the miss.
        let mut missing = item(b"absent", b"v");
        missing.cas = 1234;
        assert_eq!(
            bucket.store(&missing, StoreOperation::Cas, cookie()).status,
            Status::KeyNoent
        );
    }

    #[test]
    fn test_append_prepend() {
        let (bucket, _, _) = bucket();
        bucket.store(&item(b"k", b"middle"), StoreOperation::Set, cookie());
        bucket.store(&item(b"k", b"-end"), StoreOperation::Append, cookie());
        bucket.store(&item(b"k", b"start-"), StoreOperation::Prepend, cookie());
        let result = bucket.get(
            &DocKey::default_collection(b"k".to_vec()),
            Vbid::new(0),
            cookie(),
            GetOptions::default(),
        );
        assert_eq!(result.item.unwrap().value, b"start-middle-end");

        let missing = bucket.store(&item(b"absent", b"x"), StoreOperation::Append, cookie());
        assert_eq!(missing.status, Status::NotStored);
    }

    #[test]
    fn test_get_missing_key() {
        let (bucket, _, _) = bucket();
        let result = bucket.get(
            &DocKey::default_collection(b"missing".to_vec()),
            Vbid::new(0),
            cookie(),
            GetOptions::default(),
        );
        assert_eq!(result.status, Status::KeyNoent);
    }

    #[test]
    fn test_non_active_partition_rejects() {
        let (bucket, _, _) = bucket();
        let result = bucket.store(
            &Item::new(
                DocKey::default_collection(b"k".to_vec()),
                Vbid::new(1),
                b"v".to_vec(),
                0,
                0,
                Datatype::RAW,
            ),
            StoreOperation::Set,
            cookie(),
        );
        assert_eq!(result.status, Status::NotMyVbucket);
    }

    #[test]
    fn test_pending_partition_parks_operation() {
        let (bucket, _, _) = bucket();
        bucket.set_vbucket_state(Vbid::new(1), VbState::Pending);
        let result = bucket.store(
            &Item::new(
                DocKey::default_collection(b"k".to_vec()),
                Vbid::new(1),
                b"v".to_vec(),
                0,
                0,
                Datatype::RAW,
            ),
            StoreOperation::Set,
            cookie(),
        );
        assert_eq!(result.status, Status::WouldBlock);
        assert_eq!(bucket.vbucket(Vbid::new(1)).unwrap().num_pending_ops(), 1);
    }

    #[test]
    fn test_delete_and_cas_mismatch() {
        let (bucket, _, _) = bucket();
        let stored = bucket.store(&item(b"k", b"v"), StoreOperation::Set, cookie());
        let key = DocKey::default_collection(b"k".to_vec());

        let wrong = bucket.delete(&key, Vbid::new(0), stored.cas + 1, cookie());
        assert_eq!(wrong.status, Status::KeyExists);

        let right = bucket.delete(&key, Vbid::new(0), stored.cas, cookie());
        assert_eq!(right.status, Status::Success);

        let missing = bucket.delete(&key, Vbid::new(0), 0, cookie());
        assert_eq!(missing.status, Status::KeyNoent);
    }

    #[test]
    fn test_quota_exhaustion_is_tmpfail() {
        let (bucket, _, _) = bucket_with_quota(8 * 1024);
        let value = vec![b'x'; 512];
        let mut status = Status::Success;
        let mut count = 0;
        while status == Status::Success {
            let result = bucket.store(
                &item(format!("key_{count}").as_bytes(), &value),
                StoreOperation::Set,
                cookie(),
            );
            status = result.status;
            count += 1;
        }
        assert_eq!(status, Status::TmpFail);
        assert!(count > 1, "some documents must fit under the quota");
        let vb = bucket.vbucket(Vbid::new(0)).unwrap();
        let mut stats = Vec::new();
        vb.add_stats(true, &mut |name, value| stats.push((name.to_string(), value)));
        let rejects = stats.iter().find(|(n, _)| n == "ops_reject").unwrap();
        assert_eq!(rejects.1, "1");
    }

    #[test]
    fn test_flush_persists_and_notifies() {
        let (bucket, notifier, _) = bucket();
        bucket.store(&item(b"a", b"1"), StoreOperation::Set, cookie());
        bucket.store(&item(b"b", b"2"), StoreOperation::Set, cookie());
        let vb = bucket.vbucket(Vbid::new(0)).unwrap();
        vb.add_high_priority(2, CookieId::new(42), HighPriorityNotify::Seqno);

        let flushed = bucket.flush_vbucket(Vbid::new(0));
        assert_eq!(flushed, 2);
        assert_eq!(vb.persistence_seqno(), 2);

        let events = notifier.drain();
        assert!(events.contains(&(CookieId::new(42), Status::Success)));

        // Nothing further to flush.
        assert_eq!(bucket.flush_vbucket(Vbid::new(0)), 0);
    }

    #[test]
    fn test_operations_on_deleted_collection_miss() {
        let (bucket, _, _) = bucket();
        bucket.store(&item(b"k", b"v"), StoreOperation::Set, cookie());

        // Begin deleting $default; its keys disappear from the data path.
        bucket
            .update_collections_manifest(r#"{"separator":"::","collections":[]}"#)
            .expect("manifest applies");

        let key = DocKey::default_collection(b"k".to_vec());
        assert_eq!(
            bucket.get(&key, Vbid::new(0), cookie(), GetOptions::default()).status,
            Status::KeyNoent
        );
        assert_eq!(
            bucket.store(&item(b"k", b"v2"), StoreOperation::Set, cookie()).status,
            Status::KeyNoent
        );
        assert_eq!(bucket.delete(&key, Vbid::new(0), 0, cookie()).status, Status::KeyNoent);
    }

    #[test]
    fn test_bg_fetch_roundtrip_after_eviction() {
        let (bucket, notifier, _) = bucket();
        bucket.store(&item(b"k", b"value"), StoreOperation::Set, cookie());
        bucket.flush_vbucket(Vbid::new(0));

        let key = DocKey::default_collection(b"k".to_vec());
        let vb = bucket.vbucket(Vbid::new(0)).unwrap();
        {
            let mut guard = vb.ht().lock_bucket(&key);
            let pos = guard.find(&key, WantsDeleted::No).unwrap();
            guard.eject(pos, EvictionPolicy::ValueOnly);
        }

        // First read parks on a background fetch.
        let parked = bucket.get(&key, Vbid::new(0), CookieId::new(9), GetOptions::default());
        assert_eq!(parked.status, Status::WouldBlock);

        assert_eq!(bucket.run_bg_fetcher(Vbid::new(0)), 1);
        let events = notifier.drain();
        assert!(events.contains(&(CookieId::new(9), Status::Success)));

        // Re-driven read now succeeds from memory.
        let result = bucket.get(&key, Vbid::new(0), CookieId::new(9), GetOptions::default());
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.item.unwrap().value, b"value");
    }
}
