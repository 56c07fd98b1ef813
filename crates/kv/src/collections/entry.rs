//! Per-partition state of one collection name.

use driftkv_types::CollectionUid;

/// Sentinel seqno meaning "no generation at this end of the lifecycle".
///
/// A start seqno of this value means no open generation; an end seqno of
/// this value means no deleting generation.
pub const STATE_COLLECTION_OPEN: i64 = -6;

/// Lifecycle state for one collection name tracked by a partition.
///
/// At most one open and one deleting generation exist per name at any
/// time, giving three legal states: exclusive-open, exclusive-deleting,
/// and open-and-deleting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry {
    uid: CollectionUid,
    start_seqno: i64,
    end_seqno: i64,
}

impl ManifestEntry {
    /// Creates an exclusive-open entry starting at `start_seqno`.
    pub fn new_open(uid: CollectionUid, start_seqno: i64) -> Self {
        Self { uid, start_seqno, end_seqno: STATE_COLLECTION_OPEN }
    }

    /// Rebuilds an entry from persisted seqnos.
    pub fn from_parts(uid: CollectionUid, start_seqno: i64, end_seqno: i64) -> Self {
        Self { uid, start_seqno, end_seqno }
    }

    /// Generation number of the current (newest) generation.
    pub fn uid(&self) -> CollectionUid {
        self.uid
    }

    /// Seqno at which the open generation began, or the sentinel.
    pub fn start_seqno(&self) -> i64 {
        self.start_seqno
    }

    /// Seqno at which the deleting generation ends, or the sentinel.
    pub fn end_seqno(&self) -> i64 {
        self.end_seqno
    }

    /// True when an open generation exists.
    pub fn is_open(&self) -> bool {
        self.start_seqno >= 0
    }

    /// True when a deleting generation exists.
    pub fn is_deleting(&self) -> bool {
        self.end_seqno >= 0
    }

    /// Open with no deleting generation.
    pub fn is_exclusive_open(&self) -> bool {
        self.is_open() && !self.is_deleting()
    }

    /// Deleting with no open generation.
    pub fn is_exclusive_deleting(&self) -> bool {
        !self.is_open() && self.is_deleting()
    }

    /// Both an open and a deleting generation exist.
    pub fn is_open_and_deleting(&self) -> bool {
        self.is_open() && self.is_deleting()
    }

    /// Begins deletion of the open generation at `end_seqno`.
    pub fn mark_deleting(&mut self, end_seqno: i64) {
        self.end_seqno = end_seqno;
        self.start_seqno = STATE_COLLECTION_OPEN;
    }

    /// Opens a new generation over a deleting entry.
    pub fn reopen(&mut self, uid: CollectionUid, start_seqno: i64) {
        self.uid = uid;
        self.start_seqno = start_seqno;
    }

    /// Clears the deleting half once its items have been purged.
    pub fn complete_deletion(&mut self) {
        self.end_seqno = STATE_COLLECTION_OPEN;
    }
}
