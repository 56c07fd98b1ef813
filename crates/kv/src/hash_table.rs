//! Hash-indexed in-memory item table.
//!
//! The table is split into a fixed number of independently lockable
//! buckets. All reads and mutations of stored values happen under a
//! [`HashTableGuard`] for the owning bucket; a find-then-modify pair must
//! hold one guard across both steps. Counters are atomic and may be read
//! without any guard.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use driftkv_types::key::DocKey;
use driftkv_types::{EvictionPolicy, WantsDeleted};
use parking_lot::{Mutex, MutexGuard};

use crate::stats::KvStats;
use crate::stored_value::{Item, StoredValue};

/// The in-memory key → stored-value index of one partition.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Mutex<Vec<StoredValue>>>,
    stats: Arc<KvStats>,
    /// Live items resident in the table (non-temp, non-deleted).
    num_items: AtomicUsize,
    /// Live items tracked, including entries ejected under full eviction.
    num_total_items: AtomicUsize,
    /// Live items whose value is not resident.
    num_non_resident: AtomicUsize,
    /// Background-fetch placeholders.
    num_temp_items: AtomicUsize,
    /// Soft-deleted entries awaiting drain.
    num_deleted_items: AtomicUsize,
    /// Values ejected since creation.
    num_ejects: AtomicUsize,
    /// Estimated bytes held by this table.
    mem_size: AtomicUsize,
}

impl HashTable {
    /// Creates a table with `size` lockable buckets.
    pub fn new(size: usize, stats: Arc<KvStats>) -> Self {
        let buckets = (0..size.max(1)).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            buckets,
            stats,
            num_items: AtomicUsize::new(0),
            num_total_items: AtomicUsize::new(0),
            num_non_resident: AtomicUsize::new(0),
            num_temp_items: AtomicUsize::new(0),
            num_deleted_items: AtomicUsize::new(0),
            num_ejects: AtomicUsize::new(0),
            mem_size: AtomicUsize::new(0),
        }
    }

    /// Number of lockable buckets.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &DocKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }

    /// Locks the bucket owning `key`.
    pub fn lock_bucket(&self, key: &DocKey) -> HashTableGuard<'_> {
        let index = self.bucket_index(key);
        HashTableGuard { table: self, items: self.buckets[index].lock() }
    }

    /// Locks bucket `index` directly (pager iteration).
    pub fn lock_bucket_at(&self, index: usize) -> HashTableGuard<'_> {
        HashTableGuard { table: self, items: self.buckets[index].lock() }
    }

    /// Live resident item count.
    pub fn num_in_memory_items(&self) -> usize {
        self.num_items.load(Ordering::Relaxed)
    }

    /// Live item count, including full-eviction ejected entries.
    pub fn num_items(&self) -> usize {
        self.num_total_items.load(Ordering::Relaxed)
    }

    /// Live items without a resident value.
    pub fn num_non_resident_items(&self) -> usize {
        self.num_non_resident.load(Ordering::Relaxed)
    }

    /// Background-fetch placeholder count.
    pub fn num_temp_items(&self) -> usize {
        self.num_temp_items.load(Ordering::Relaxed)
    }

    /// Soft-deleted entry count.
    pub fn num_deleted_items(&self) -> usize {
        self.num_deleted_items.load(Ordering::Relaxed)
    }

    /// Values ejected since creation.
    pub fn num_ejects(&self) -> usize {
        self.num_ejects.load(Ordering::Relaxed)
    }

    /// Estimated bytes held by this table's entries.
    pub fn memory_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }

    fn classify_insert(&self, sv: &StoredValue) {
        if sv.is_temp_initial() {
            self.num_temp_items.fetch_add(1, Ordering::Relaxed);
        } else if sv.is_deleted() {
            self.num_deleted_items.fetch_add(1, Ordering::Relaxed);
        } else {
            self.num_items.fetch_add(1, Ordering::Relaxed);
            self.num_total_items.fetch_add(1, Ordering::Relaxed);
            if !sv.is_resident() {
                self.num_non_resident.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn classify_remove(&self, sv: &StoredValue) {
        if sv.is_temp_initial() {
            self.num_temp_items.fetch_sub(1, Ordering::Relaxed);
        } else if sv.is_deleted() {
            self.num_deleted_items.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.num_items.fetch_sub(1, Ordering::Relaxed);
            self.num_total_items.fetch_sub(1, Ordering::Relaxed);
            if !sv.is_resident() {
                self.num_non_resident.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// Exclusive access to one hash bucket.
///
/// Entry positions returned by [`find`](Self::find) stay valid until a
/// mutating call that removes entries (`erase`, full-eviction `eject`).
pub struct HashTableGuard<'a> {
    table: &'a HashTable,
    items: MutexGuard<'a, Vec<StoredValue>>,
}

impl HashTableGuard<'_> {
    /// Locates `key` in this bucket.
    ///
    /// Live and temp-initial entries are always returned; soft-deleted
    /// entries only when `wants_deleted` says so.
    pub fn find(&self, key: &DocKey, wants_deleted: WantsDeleted) -> Option<usize> {
        let pos = self.items.iter().position(|sv| sv.key() == key)?;
        if self.items[pos].is_deleted() && wants_deleted == WantsDeleted::No {
            return None;
        }
        Some(pos)
    }

    /// Entry at `pos`.
    pub fn entry(&self, pos: usize) -> &StoredValue {
        &self.items[pos]
    }

    /// Mutable entry at `pos`.
    ///
    /// For metadata-only mutation (CAS, seqno, NRU). Residency- or
    /// size-changing updates must go through the dedicated guard methods
    /// so the table's accounting stays correct.
    pub fn entry_mut(&mut self, pos: usize) -> &mut StoredValue {
        &mut self.items[pos]
    }

    /// Number of entries in this bucket.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when this bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts a stored value, returning its position.
    pub fn insert(&mut self, sv: StoredValue) -> usize {
        let size = sv.size();
        self.table.classify_insert(&sv);
        self.table.mem_size.fetch_add(size, Ordering::Relaxed);
        self.table.stats.mem_allocated(size);
        self.items.push(sv);
        self.items.len() - 1
    }

    /// Replaces the entry's content from a fresh engine item.
    pub fn update_value(&mut self, pos: usize, item: &Item) {
        let before = self.items[pos].size();
        self.table.classify_remove(&self.items[pos]);
        self.items[pos].replace_from_item(item);
        self.table.classify_insert(&self.items[pos]);
        let after = self.items[pos].size();
        self.table.mem_size.fetch_add(after, Ordering::Relaxed);
        self.table.mem_size.fetch_sub(before, Ordering::Relaxed);
        if after >= before {
            self.table.stats.mem_allocated(after - before);
        } else {
            self.table.stats.mem_freed(before - after);
        }
    }

    /// Soft-deletes the entry at `pos`.
    ///
    /// The value is released immediately; metadata stays until the
    /// checkpoint has drained and a later eviction removes it.
    pub fn soft_delete(&mut self, pos: usize) {
        let before = self.items[pos].size();
        self.table.classify_remove(&self.items[pos]);
        self.items[pos].soft_delete();
        self.table.classify_insert(&self.items[pos]);
        let after = self.items[pos].size();
        self.table.mem_size.fetch_sub(before - after, Ordering::Relaxed);
        self.table.stats.mem_freed(before - after);
    }

    /// Ejects the entry's value per the eviction policy.
    ///
    /// Under `ValueOnly` the value is dropped and metadata retained; under
    /// `FullEviction` the whole entry is removed (positions after `pos`
    /// are invalidated). Returns false when the entry is not ejectable
    /// (deleted, temp, or already non-resident).
    pub fn eject(&mut self, pos: usize, policy: EvictionPolicy) -> bool {
        let sv = &self.items[pos];
        if sv.is_deleted() || sv.is_temp_initial() || !sv.is_resident() {
            return false;
        }
        match policy {
            EvictionPolicy::ValueOnly => {
                let freed = self.items[pos].eject_value();
                self.table.num_non_resident.fetch_add(1, Ordering::Relaxed);
                self.table.num_ejects.fetch_add(1, Ordering::Relaxed);
                self.table.mem_size.fetch_sub(freed, Ordering::Relaxed);
                self.table.stats.mem_freed(freed);
            }
            EvictionPolicy::FullEviction => {
                let sv = self.items.swap_remove(pos);
                let size = sv.size();
                // The item still exists on disk; only the in-memory
                // counters drop.
                self.table.num_items.fetch_sub(1, Ordering::Relaxed);
                self.table.num_ejects.fetch_add(1, Ordering::Relaxed);
                self.table.mem_size.fetch_sub(size, Ordering::Relaxed);
                self.table.stats.mem_freed(size);
            }
        }
        true
    }

    /// Removes the entry at `pos` outright.
    ///
    /// Positions after `pos` are invalidated.
    pub fn erase(&mut self, pos: usize) -> StoredValue {
        let sv = self.items.swap_remove(pos);
        let size = sv.size();
        self.table.classify_remove(&sv);
        self.table.mem_size.fetch_sub(size, Ordering::Relaxed);
        self.table.stats.mem_freed(size);
        sv
    }

    /// Restores a fetched value into a non-resident or temp entry.
    pub fn restore_value(&mut self, pos: usize, item: &Item) {
        let before = self.items[pos].size();
        self.table.classify_remove(&self.items[pos]);
        self.items[pos].restore_value(item);
        self.table.classify_insert(&self.items[pos]);
        let after = self.items[pos].size();
        self.table.mem_size.fetch_add(after - before, Ordering::Relaxed);
        self.table.stats.mem_allocated(after - before);
    }

    /// Restores fetched metadata into a temp entry.
    pub fn restore_meta(&mut self, pos: usize, item: &Item) -> bool {
        self.table.classify_remove(&self.items[pos]);
        let restored = self.items[pos].restore_meta(item);
        self.table.classify_insert(&self.items[pos]);
        restored
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use driftkv_types::config::QuotaConfig;
    use driftkv_types::datatype::Datatype;
    use driftkv_types::Vbid;

    use super::*;

    fn table() -> HashTable {
        HashTable::new(47, Arc::new(KvStats::new(&QuotaConfig::default())))
    }

    fn key(k: &[u8]) -> DocKey {
        DocKey::default_collection(k.to_vec())
    }

    fn item(k: &[u8], v: &[u8]) -> Item {
        Item::new(key(k), Vbid::new(0), v.to_vec(), 0, 0, Datatype::RAW)
    }

    #[test]
    fn test_insert_and_find() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        let pos = guard.find(&key(b"a"), WantsDeleted::No).expect("should find");
        assert_eq!(guard.entry(pos).value(), Some(&b"v"[..]));
        drop(guard);
        assert_eq!(ht.num_items(), 1);
        assert_eq!(ht.num_in_memory_items(), 1);
    }

    #[test]
    fn test_find_missing() {
        let ht = table();
        let guard = ht.lock_bucket(&key(b"missing"));
        assert!(guard.find(&key(b"missing"), WantsDeleted::No).is_none());
    }

    #[test]
    fn test_soft_delete_hides_entry() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        guard.soft_delete(pos);
        assert!(guard.find(&key(b"a"), WantsDeleted::No).is_none());
        assert!(guard.find(&key(b"a"), WantsDeleted::Yes).is_some());
        drop(guard);
        assert_eq!(ht.num_items(), 0);
        assert_eq!(ht.num_deleted_items(), 1);
    }

    #[test]
    fn test_value_only_eject_keeps_metadata() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"some-value")));
        assert!(guard.eject(pos, EvictionPolicy::ValueOnly));
        assert!(!guard.entry(pos).is_resident());
        assert_eq!(guard.entry(pos).key().data(), b"a");
        drop(guard);
        assert_eq!(ht.num_items(), 1);
        assert_eq!(ht.num_non_resident_items(), 1);
        assert_eq!(ht.num_ejects(), 1);
    }

    #[test]
    fn test_full_eviction_eject_removes_entry() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        assert!(guard.eject(pos, EvictionPolicy::FullEviction));
        assert!(guard.find(&key(b"a"), WantsDeleted::Yes).is_none());
        drop(guard);
        // The entry is gone from memory but still counted as an item.
        assert_eq!(ht.num_in_memory_items(), 0);
        assert_eq!(ht.num_items(), 1);
    }

    #[test]
    fn test_eject_rejects_deleted_and_temp() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        guard.soft_delete(pos);
        assert!(!guard.eject(pos, EvictionPolicy::ValueOnly));

        let temp_pos = guard.insert(StoredValue::temp_initial(key(b"t")));
        assert!(!guard.eject(temp_pos, EvictionPolicy::ValueOnly));
    }

    #[test]
    fn test_memory_accounting() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"0123456789")));
        let with_value = ht.memory_size();
        assert!(with_value > 10);
        guard.eject(pos, EvictionPolicy::ValueOnly);
        drop(guard);
        assert_eq!(ht.memory_size(), with_value - 10);
    }

    #[test]
    fn test_update_value_adjusts_memory() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"short")));
        let before = ht.memory_size();
        guard.update_value(pos, &item(b"a", b"considerably-longer-value"));
        drop(guard);
        assert_eq!(ht.memory_size(), before + 25 - 5);
        assert_eq!(ht.num_items(), 1);
    }

    #[test]
    fn test_restore_value_clears_non_resident() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        guard.eject(pos, EvictionPolicy::ValueOnly);
        assert_eq!(ht.num_non_resident_items(), 1);
        guard.restore_value(pos, &item(b"a", b"v"));
        assert!(guard.entry(pos).is_resident());
        drop(guard);
        assert_eq!(ht.num_non_resident_items(), 0);
    }

    #[test]
    fn test_temp_items_not_counted_as_items() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"t"));
        guard.insert(StoredValue::temp_initial(key(b"t")));
        drop(guard);
        assert_eq!(ht.num_items(), 0);
        assert_eq!(ht.num_temp_items(), 1);
    }

    #[test]
    fn test_erase_releases_everything() {
        let ht = table();
        let mut guard = ht.lock_bucket(&key(b"a"));
        let pos = guard.insert(StoredValue::from_item(&item(b"a", b"v")));
        guard.erase(pos);
        drop(guard);
        assert_eq!(ht.num_items(), 0);
        assert_eq!(ht.memory_size(), 0);
    }

    #[test]
    fn test_same_bucket_for_same_key() {
        let ht = table();
        {
            let mut guard = ht.lock_bucket(&key(b"stable"));
            guard.insert(StoredValue::from_item(&item(b"stable", b"v")));
        }
        let guard = ht.lock_bucket(&key(b"stable"));
        assert!(guard.find(&key(b"stable"), WantsDeleted::No).is_some());
    }
}
