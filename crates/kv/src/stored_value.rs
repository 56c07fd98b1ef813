//! In-memory representation of one logical item.

use driftkv_types::datatype::Datatype;
use driftkv_types::key::DocKey;
use driftkv_types::Vbid;

/// NRU value given to freshly stored items.
pub const INITIAL_NRU: u8 = 2;

/// Greatest (least recently used) NRU value; first eviction candidates.
pub const MAX_NRU: u8 = 3;

/// An item flowing through the engine API.
///
/// This is the materialised form handed across the engine boundary:
/// allocation fills one in, `store` consumes it, and a successful get
/// returns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Document key.
    pub key: DocKey,
    /// Owning partition.
    pub vbid: Vbid,
    /// Value bytes.
    pub value: Vec<u8>,
    /// Client-opaque flags.
    pub flags: u32,
    /// Absolute expiry in seconds since the epoch (0 = never).
    pub exptime: u32,
    /// Datatype bitset.
    pub datatype: Datatype,
    /// Compare-and-swap token (0 = unset).
    pub cas: u64,
    /// Sequence number, once assigned by the checkpoint manager.
    pub seqno: i64,
    /// Revision metadata.
    pub rev_seqno: u64,
}

impl Item {
    /// Creates an item with no CAS and no seqno assigned yet.
    pub fn new(
        key: DocKey,
        vbid: Vbid,
        value: Vec<u8>,
        flags: u32,
        exptime: u32,
        datatype: Datatype,
    ) -> Self {
        Self { key, vbid, value, flags, exptime, datatype, cas: 0, seqno: 0, rev_seqno: 1 }
    }
}

/// One logical item as stored in the hash table.
///
/// A stored value owns its key and (when resident) its value bytes.
/// Invariants: a live item's CAS is never zero; a temp-initial item is a
/// placeholder for an in-flight background fetch and carries neither value
/// nor CAS.
#[derive(Debug, Clone)]
pub struct StoredValue {
    key: DocKey,
    value: Option<Vec<u8>>,
    cas: u64,
    seqno: i64,
    rev_seqno: u64,
    flags: u32,
    exptime: u32,
    datatype: Datatype,
    nru: u8,
    deleted: bool,
    temp_initial: bool,
    non_existent: bool,
    locked: bool,
}

impl StoredValue {
    /// Creates a resident stored value from an engine item.
    pub fn from_item(item: &Item) -> Self {
        Self {
            key: item.key.clone(),
            value: Some(item.value.clone()),
            cas: item.cas,
            seqno: item.seqno,
            rev_seqno: item.rev_seqno,
            flags: item.flags,
            exptime: item.exptime,
            datatype: item.datatype,
            nru: INITIAL_NRU,
            deleted: false,
            temp_initial: false,
            non_existent: false,
            locked: false,
        }
    }

    /// Creates a temp-initial placeholder for a pending background fetch.
    pub fn temp_initial(key: DocKey) -> Self {
        Self {
            key,
            value: None,
            cas: 0,
            seqno: 0,
            rev_seqno: 0,
            flags: 0,
            exptime: 0,
            datatype: Datatype::RAW,
            nru: INITIAL_NRU,
            deleted: false,
            temp_initial: true,
            non_existent: false,
            locked: false,
        }
    }

    /// Document key.
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// Value bytes when resident.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Compare-and-swap token.
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Replaces the CAS token.
    pub fn set_cas(&mut self, cas: u64) {
        self.cas = cas;
    }

    /// Sequence number.
    pub fn seqno(&self) -> i64 {
        self.seqno
    }

    /// Replaces the sequence number.
    pub fn set_seqno(&mut self, seqno: i64) {
        self.seqno = seqno;
    }

    /// Revision metadata.
    pub fn rev_seqno(&self) -> u64 {
        self.rev_seqno
    }

    /// Client-opaque flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Absolute expiry in seconds (0 = never).
    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    /// Datatype bitset.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// NRU eviction age.
    pub fn nru(&self) -> u8 {
        self.nru
    }

    /// Overrides the NRU eviction age.
    pub fn set_nru(&mut self, nru: u8) {
        self.nru = nru.min(MAX_NRU);
    }

    /// Marks the item recently used.
    pub fn referenced(&mut self) {
        self.nru = self.nru.saturating_sub(1);
    }

    /// Ages the item one NRU step towards eviction.
    pub fn age(&mut self) {
        self.nru = (self.nru + 1).min(MAX_NRU);
    }

    /// True when the value bytes are in memory.
    pub fn is_resident(&self) -> bool {
        self.value.is_some()
    }

    /// True for soft-deleted entries awaiting drain and eviction.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// True for background-fetch placeholders.
    pub fn is_temp_initial(&self) -> bool {
        self.temp_initial
    }

    /// True once a background fetch proved the key absent on disk.
    pub fn is_non_existent(&self) -> bool {
        self.non_existent
    }

    /// True while a client holds the item locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True when the expiry time has passed.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.exptime != 0 && u64::from(self.exptime) <= now_secs
    }

    /// Replaces content from a fresh engine item, bumping the revision.
    pub fn replace_from_item(&mut self, item: &Item) {
        self.value = Some(item.value.clone());
        self.flags = item.flags;
        self.exptime = item.exptime;
        self.datatype = item.datatype;
        self.rev_seqno += 1;
        self.deleted = false;
        self.temp_initial = false;
        self.non_existent = false;
        self.nru = INITIAL_NRU;
    }

    /// Soft-deletes the entry: the value is dropped, metadata retained
    /// until the checkpoint has drained and eviction removes it.
    pub fn soft_delete(&mut self) {
        self.value = None;
        self.deleted = true;
        self.rev_seqno += 1;
        self.datatype = Datatype::RAW;
    }

    /// Drops the resident value, keeping metadata.
    ///
    /// Returns the number of bytes released.
    pub fn eject_value(&mut self) -> usize {
        self.value.take().map(|v| v.len()).unwrap_or(0)
    }

    /// Restores the value after a successful background fetch.
    pub fn restore_value(&mut self, item: &Item) {
        self.value = Some(item.value.clone());
        self.flags = item.flags;
        self.exptime = item.exptime;
        self.datatype = item.datatype;
        self.cas = item.cas;
        self.seqno = item.seqno;
        self.rev_seqno = item.rev_seqno;
        self.temp_initial = false;
        self.non_existent = false;
    }

    /// Restores metadata only (metadata background fetch).
    ///
    /// Returns false when the entry was not a restorable placeholder.
    pub fn restore_meta(&mut self, item: &Item) -> bool {
        if !self.temp_initial && self.is_resident() {
            return false;
        }
        self.flags = item.flags;
        self.exptime = item.exptime;
        self.datatype = item.datatype;
        self.cas = item.cas;
        self.seqno = item.seqno;
        self.rev_seqno = item.rev_seqno;
        self.temp_initial = false;
        true
    }

    /// Marks a placeholder as proven-absent on disk.
    pub fn set_non_existent(&mut self) {
        self.non_existent = true;
    }

    /// Materialises the engine-item form of this entry.
    pub fn to_item(&self, vbid: Vbid) -> Item {
        Item {
            key: self.key.clone(),
            vbid,
            value: self.value.clone().unwrap_or_default(),
            flags: self.flags,
            exptime: self.exptime,
            datatype: self.datatype,
            cas: self.cas,
            seqno: self.seqno,
            rev_seqno: self.rev_seqno,
        }
    }

    /// Estimated memory footprint in bytes.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.len()
            + self.value.as_ref().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

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

    #[test]
    fn test_from_item_is_resident() {
        let sv = StoredValue::from_item(&item(b"k", b"v"));
        assert!(sv.is_resident());
        assert!(!sv.is_deleted());
        assert!(!sv.is_temp_initial());
        assert_eq!(sv.value(), Some(&b"v"[..]));
        assert_eq!(sv.nru(), INITIAL_NRU);
    }

    #[test]
    fn test_temp_initial_has_no_value_or_cas() {
        let sv = StoredValue::temp_initial(DocKey::default_collection(b"k".to_vec()));
        assert!(sv.is_temp_initial());
        assert!(!sv.is_resident());
        assert_eq!(sv.cas(), 0);
    }

    #[test]
    fn test_expiry() {
        let mut it = item(b"k", b"v");
        it.exptime = 100;
        let sv = StoredValue::from_item(&it);
        assert!(!sv.is_expired(99));
        assert!(sv.is_expired(100));
        assert!(sv.is_expired(101));
    }

    #[test]
    fn test_zero_exptime_never_expires() {
        let sv = StoredValue::from_item(&item(b"k", b"v"));
        assert!(!sv.is_expired(u64::MAX));
    }

    #[test]
    fn test_soft_delete_drops_value_keeps_meta() {
        let mut sv = StoredValue::from_item(&item(b"k", b"v"));
        let rev = sv.rev_seqno();
        sv.soft_delete();
        assert!(sv.is_deleted());
        assert!(!sv.is_resident());
        assert_eq!(sv.rev_seqno(), rev + 1);
        assert_eq!(sv.key().data(), b"k");
    }

    #[test]
    fn test_eject_and_restore_value() {
        let mut sv = StoredValue::from_item(&item(b"k", b"value-bytes"));
        assert_eq!(sv.eject_value(), 11);
        assert!(!sv.is_resident());

        let mut fetched = item(b"k", b"value-bytes");
        fetched.cas = 7;
        fetched.seqno = 3;
        sv.restore_value(&fetched);
        assert!(sv.is_resident());
        assert_eq!(sv.cas(), 7);
        assert_eq!(sv.seqno(), 3);
    }

    #[test]
    fn test_restore_meta_only_on_placeholder() {
        let mut sv = StoredValue::from_item(&item(b"k", b"v"));
        assert!(!sv.restore_meta(&item(b"k", b"")));

        let mut temp = StoredValue::temp_initial(DocKey::default_collection(b"k".to_vec()));
        let mut meta = item(b"k", b"");
        meta.cas = 9;
        assert!(temp.restore_meta(&meta));
        assert!(!temp.is_temp_initial());
        assert_eq!(temp.cas(), 9);
    }

    #[test]
    fn test_nru_aging_saturates() {
        let mut sv = StoredValue::from_item(&item(b"k", b"v"));
        sv.age();
        sv.age();
        sv.age();
        assert_eq!(sv.nru(), MAX_NRU);
        sv.referenced();
        assert_eq!(sv.nru(), MAX_NRU - 1);
    }

    #[test]
    fn test_replace_bumps_revision() {
        let mut sv = StoredValue::from_item(&item(b"k", b"v1"));
        let rev = sv.rev_seqno();
        sv.replace_from_item(&item(b"k", b"v2"));
        assert_eq!(sv.rev_seqno(), rev + 1);
        assert_eq!(sv.value(), Some(&b"v2"[..]));
    }
}
