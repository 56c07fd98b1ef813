//! Checkpoint-ordered write queue.
//!
//! Every committed mutation and manifest system event of a partition
//! produces exactly one queued item. Items are grouped into bounded,
//! snapshot-tagged checkpoints; consumers (the flusher, DCP producers)
//! follow the stream through named cursors. A closed checkpoint whose
//! cursors have all moved past it is collectable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use driftkv_types::config::CheckpointConfig;
use driftkv_types::datatype::Datatype;
use driftkv_types::hlc::HybridLogicalClock;
use driftkv_types::key::DocKey;
use driftkv_types::{GenerateBySeqno, GenerateCas, SnapshotRange, Vbid};
use parking_lot::Mutex;

use crate::collections::SystemEvent;
use crate::stored_value::StoredValue;

/// Name of the persistence cursor registered at creation.
pub const PERSISTENCE_CURSOR: &str = "persistence";

/// Operation type of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    /// A client mutation or deletion.
    Mutation,
    /// A collections manifest event.
    SystemEvent,
}

/// One entry in a checkpoint.
///
/// Queued items are immutable once appended; cursors share them by
/// reference until the owning checkpoint is collected.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    key: DocKey,
    vbid: Vbid,
    seqno: i64,
    cas: u64,
    flags: u32,
    exptime: u32,
    value: Vec<u8>,
    datatype: Datatype,
    deleted: bool,
    op: QueueOp,
    system_event: Option<SystemEvent>,
    queued_time_secs: u64,
}

impl QueuedItem {
    /// Builds a mutation item from a stored value.
    pub fn from_stored_value(sv: &StoredValue, vbid: Vbid, queued_time_secs: u64) -> Self {
        Self {
            key: sv.key().clone(),
            vbid,
            seqno: sv.seqno(),
            cas: sv.cas(),
            flags: sv.flags(),
            exptime: sv.exptime(),
            value: sv.value().map(<[u8]>::to_vec).unwrap_or_default(),
            datatype: sv.datatype(),
            deleted: sv.is_deleted(),
            op: QueueOp::Mutation,
            system_event: None,
            queued_time_secs,
        }
    }

    /// Builds a system-event item.
    ///
    /// The event subtype rides in the flags field on the wire; the
    /// `deleted` bit distinguishes begin-delete from create.
    pub fn system_event(
        key: DocKey,
        vbid: Vbid,
        value: Vec<u8>,
        event: SystemEvent,
        deleted: bool,
        seqno: i64,
        queued_time_secs: u64,
    ) -> Self {
        Self {
            key,
            vbid,
            seqno,
            cas: 0,
            flags: event as u32,
            exptime: 0,
            value,
            datatype: Datatype::RAW,
            deleted,
            op: QueueOp::SystemEvent,
            system_event: Some(event),
            queued_time_secs,
        }
    }

    /// Document key.
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// Owning partition.
    pub fn vbid(&self) -> Vbid {
        self.vbid
    }

    /// Assigned sequence number.
    pub fn seqno(&self) -> i64 {
        self.seqno
    }

    /// CAS token.
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Flags field (event subtype for system events).
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Absolute expiry in seconds.
    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    /// Value payload.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Datatype bitset.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Operation type.
    pub fn op(&self) -> QueueOp {
        self.op
    }

    /// Manifest event subtype, for system-event items.
    pub fn system_event_type(&self) -> Option<SystemEvent> {
        self.system_event
    }

    /// Wall time this item entered the queue.
    pub fn queued_time_secs(&self) -> u64 {
        self.queued_time_secs
    }

    /// Approximate bytes held by this item.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.len() + self.value.len()
    }
}

/// Result of [`CheckpointManager::queue_dirty`].
#[derive(Debug, Clone, Copy)]
pub struct QueueDirtyResult {
    /// The seqno the item was queued under.
    pub seqno: i64,
    /// The CAS the item carries (freshly minted when requested).
    pub cas: u64,
    /// True when the flusher had drained everything and should wake.
    pub notify_flusher: bool,
}

#[derive(Debug)]
struct Checkpoint {
    id: u64,
    open: bool,
    snapshot_start: u64,
    snapshot_end: u64,
    items: Vec<Arc<QueuedItem>>,
    key_index: HashMap<DocKey, usize>,
}

impl Checkpoint {
    fn new(id: u64, snapshot_start: u64, snapshot_end: u64) -> Self {
        Self { id, open: true, snapshot_start, snapshot_end, items: Vec::new(), key_index: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    checkpoint_id: u64,
    offset: usize,
}

#[derive(Debug)]
struct Inner {
    checkpoints: VecDeque<Checkpoint>,
    high_seqno: i64,
    cursors: HashMap<String, Cursor>,
}

impl Inner {
    fn open_mut(&mut self) -> &mut Checkpoint {
        self.checkpoints.back_mut().expect("manager always holds an open checkpoint")
    }

    fn open_ref(&self) -> &Checkpoint {
        self.checkpoints.back().expect("manager always holds an open checkpoint")
    }

    /// Items not yet seen by `cursor`.
    fn available_for(&self, cursor: Cursor) -> usize {
        self.checkpoints
            .iter()
            .filter(|c| c.id >= cursor.checkpoint_id)
            .map(|c| {
                if c.id == cursor.checkpoint_id {
                    c.items.len().saturating_sub(cursor.offset)
                } else {
                    c.items.len()
                }
            })
            .sum()
    }

    fn close_open_and_begin_new(&mut self) {
        let next_id = {
            let open = self.open_mut();
            open.open = false;
            open.id + 1
        };
        let start = u64::try_from(self.high_seqno + 1).unwrap_or(0);
        self.checkpoints.push_back(Checkpoint::new(next_id, start, start));
    }

    /// Drops closed checkpoints that every cursor has moved past.
    fn collect_closed(&mut self) {
        while let Some(front) = self.checkpoints.front() {
            if front.open {
                break;
            }
            let id = front.id;
            let referenced = self.cursors.values().any(|c| c.checkpoint_id <= id);
            if referenced {
                break;
            }
            self.checkpoints.pop_front();
        }
    }
}

/// Ordered queue of mutations and system events for one partition.
#[derive(Debug)]
pub struct CheckpointManager {
    vbid: Vbid,
    config: CheckpointConfig,
    inner: Mutex<Inner>,
}

impl CheckpointManager {
    /// Creates a manager whose first open checkpoint continues from the
    /// given seqno and snapshot range.
    pub fn new(
        vbid: Vbid,
        config: CheckpointConfig,
        last_seqno: i64,
        snapshot: SnapshotRange,
    ) -> Self {
        let mut cursors = HashMap::new();
        cursors.insert(PERSISTENCE_CURSOR.to_string(), Cursor { checkpoint_id: 1, offset: 0 });
        let inner = Inner {
            checkpoints: VecDeque::from([Checkpoint::new(1, snapshot.start, snapshot.end)]),
            high_seqno: last_seqno,
            cursors,
        };
        Self { vbid, config, inner: Mutex::new(inner) }
    }

    /// Owning partition id.
    pub fn vbid(&self) -> Vbid {
        self.vbid
    }

    /// Highest seqno assigned or observed.
    pub fn high_seqno(&self) -> i64 {
        self.inner.lock().high_seqno
    }

    /// Id of the open checkpoint.
    pub fn open_checkpoint_id(&self) -> u64 {
        self.inner.lock().open_ref().id
    }

    /// Renumbers the open checkpoint (history reset on state change).
    pub fn set_open_checkpoint_id(&self, id: u64) {
        let mut inner = self.inner.lock();
        let old = inner.open_ref().id;
        inner.open_mut().id = id;
        for cursor in inner.cursors.values_mut() {
            if cursor.checkpoint_id == old {
                cursor.checkpoint_id = id;
            }
        }
    }

    /// Number of checkpoints currently held, open included.
    pub fn num_checkpoints(&self) -> usize {
        self.inner.lock().checkpoints.len()
    }

    /// Items in the open checkpoint.
    pub fn num_open_checkpoint_items(&self) -> usize {
        self.inner.lock().open_ref().items.len()
    }

    /// Snapshot range of the open checkpoint.
    pub fn snapshot_range(&self) -> SnapshotRange {
        let inner = self.inner.lock();
        let open = inner.open_ref();
        SnapshotRange::new(open.snapshot_start, open.snapshot_end)
    }

    /// Appends a dirty item, assigning seqno and CAS as requested.
    ///
    /// When the item's key already appears in the open checkpoint and no
    /// cursor has passed the prior entry, the new item replaces the old at
    /// its position (checkpoint-local dedup). Returns the assigned seqno,
    /// the CAS the item carries, and whether the flusher should wake.
    pub fn queue_dirty(
        &self,
        mut item: QueuedItem,
        generate_by_seqno: GenerateBySeqno,
        generate_cas: GenerateCas,
        hlc: &HybridLogicalClock,
        now_us: u64,
    ) -> QueueDirtyResult {
        let mut inner = self.inner.lock();

        if inner.open_ref().items.len() >= self.config.max_items {
            inner.close_open_and_begin_new();
        }

        let persistence = inner.cursors.get(PERSISTENCE_CURSOR).copied();
        let notify_flusher =
            persistence.map(|cursor| inner.available_for(cursor) == 0).unwrap_or(false);

        if generate_by_seqno == GenerateBySeqno::Yes {
            item.seqno = inner.high_seqno + 1;
        }
        if generate_cas == GenerateCas::Yes {
            item.cas = hlc.next(now_us);
        }
        let seqno = item.seqno;
        let cas = item.cas;

        inner.high_seqno = inner.high_seqno.max(seqno);

        let cursors_in_open: Vec<Cursor> = {
            let open_id = inner.open_ref().id;
            inner
                .cursors
                .values()
                .filter(|c| c.checkpoint_id == open_id)
                .copied()
                .collect()
        };

        let open = inner.open_mut();
        if seqno >= 0 {
            open.snapshot_end = open.snapshot_end.max(seqno as u64);
        }

        let key = item.key.clone();
        let item = Arc::new(item);
        match open.key_index.get(&key).copied() {
            Some(pos) if !cursors_in_open.iter().any(|c| c.offset > pos) => {
                // Dedup: no consumer has observed the prior entry yet.
                open.items[pos] = item;
            }
            _ => {
                open.items.push(item);
                open.key_index.insert(key, open.items.len() - 1);
            }
        }

        QueueDirtyResult { seqno, cas, notify_flusher }
    }

    /// Appends a system event whose payload must embed its final seqno.
    ///
    /// Unlike mutations, system events never dedup: one manifest update
    /// may emit a begin-delete and a create under the same event key, and
    /// a replica needs to replay both.
    ///
    /// The seqno is decided under the append lock - the next fresh seqno
    /// when generating, otherwise `explicit_seqno` (falling back to the
    /// current high seqno) - and handed to `build`, which constructs the
    /// item carrying that seqno. System events append like any dirty
    /// item, including checkpoint-local dedup.
    pub fn queue_system_event_with<F>(
        &self,
        generate_by_seqno: GenerateBySeqno,
        explicit_seqno: Option<i64>,
        build: F,
    ) -> QueueDirtyResult
    where
        F: FnOnce(i64) -> QueuedItem,
    {
        let mut inner = self.inner.lock();

        if inner.open_ref().items.len() >= self.config.max_items {
            inner.close_open_and_begin_new();
        }

        let persistence = inner.cursors.get(PERSISTENCE_CURSOR).copied();
        let notify_flusher =
            persistence.map(|cursor| inner.available_for(cursor) == 0).unwrap_or(false);

        let seqno = match generate_by_seqno {
            GenerateBySeqno::Yes => inner.high_seqno + 1,
            GenerateBySeqno::No => explicit_seqno.unwrap_or(inner.high_seqno),
        };
        let item = build(seqno);
        debug_assert_eq!(item.seqno, seqno, "builder must stamp the decided seqno");
        let cas = item.cas;

        inner.high_seqno = inner.high_seqno.max(seqno);

        let open = inner.open_mut();
        if seqno >= 0 {
            open.snapshot_end = open.snapshot_end.max(seqno as u64);
        }
        open.items.push(Arc::new(item));

        QueueDirtyResult { seqno, cas, notify_flusher }
    }

    /// Closes the open checkpoint and begins a new one.
    ///
    /// Closing freezes the snapshot end; the new checkpoint's range
    /// starts after the current high seqno.
    pub fn create_new_checkpoint(&self) {
        self.inner.lock().close_open_and_begin_new();
    }

    /// Raises the open checkpoint's snapshot end (non-decreasing).
    pub fn update_current_snapshot_end(&self, seqno: u64) {
        let mut inner = self.inner.lock();
        let open = inner.open_mut();
        open.snapshot_end = open.snapshot_end.max(seqno);
    }

    /// Registers a consumer cursor at the earliest retained checkpoint.
    ///
    /// Returns false when the cursor name already exists.
    pub fn register_cursor(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.cursors.contains_key(name) {
            return false;
        }
        let front_id = inner.checkpoints.front().map(|c| c.id).unwrap_or(1);
        inner.cursors.insert(name.to_string(), Cursor { checkpoint_id: front_id, offset: 0 });
        true
    }

    /// Drains everything the cursor has not yet seen, in order.
    ///
    /// Advances the cursor to the end of the open checkpoint and collects
    /// closed checkpoints no cursor references any longer. Unknown cursor
    /// names drain nothing.
    pub fn get_items_for_cursor(&self, name: &str) -> Vec<Arc<QueuedItem>> {
        let mut inner = self.inner.lock();
        let Some(cursor) = inner.cursors.get(name).copied() else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        for checkpoint in inner.checkpoints.iter().filter(|c| c.id >= cursor.checkpoint_id) {
            let from = if checkpoint.id == cursor.checkpoint_id { cursor.offset } else { 0 };
            drained.extend(checkpoint.items.iter().skip(from).cloned());
        }

        let end = {
            let open = inner.open_ref();
            Cursor { checkpoint_id: open.id, offset: open.items.len() }
        };
        if let Some(cursor) = inner.cursors.get_mut(name) {
            *cursor = end;
        }
        inner.collect_closed();
        drained
    }
}
