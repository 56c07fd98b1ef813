//! The per-partition collections manifest state machine.
//!
//! The manifest tracks which collections are open or deleting in one
//! partition and answers, for every read, whether a key is logically
//! visible at a given seqno. Every lifecycle change queues a system event
//! into the partition's checkpoint so replicas replay the exact same
//! transitions at the exact same seqnos.
//!
//! Two serialized forms exist:
//! - the public JSON (`to_json`) lists open generations only, matching the
//!   bucket manifest shape;
//! - the full [`SerializedManifest`] includes every entry with its start
//!   and end seqnos plus the changed entry, and is the payload embedded in
//!   outgoing system-event items (and the recovery representation).

use std::collections::HashMap;

use driftkv_types::key::{
    make_collection_event_key, make_delete_event_key, make_separator_event_key, DocKey,
    DocNamespace, DEFAULT_COLLECTION_NAME, DEFAULT_SEPARATOR,
};
use driftkv_types::{GenerateBySeqno, DEFAULT_COLLECTION_UID};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::entry::{ManifestEntry, STATE_COLLECTION_OPEN};
use super::{BucketManifest, CollectionIdentifier, ManifestError, SystemEvent};
use crate::checkpoint::QueuedItem;
use crate::vbucket::VBucket;

/// Full serialization of a partition manifest.
///
/// Embedded in system-event values; carries every entry (deleting ones
/// included) plus the entry the emitting operation changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedManifest {
    /// Current key separator.
    pub separator: String,
    /// Every tracked entry.
    pub entries: Vec<SerializedEntry>,
    /// The entry the emitting event changed, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<SerializedIdentifier>,
}

/// One entry of a [`SerializedManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEntry {
    /// Collection name.
    pub name: String,
    /// Generation number as a hexadecimal string.
    pub uid: String,
    /// Start seqno or the open sentinel.
    pub start_seqno: i64,
    /// End seqno or the open sentinel.
    pub end_seqno: i64,
}

/// The `(name, uid)` of a changed entry in a [`SerializedManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedIdentifier {
    /// Collection name.
    pub name: String,
    /// Generation number as a hexadecimal string.
    pub uid: String,
}

/// Extracts the changed collection from a system-event payload.
///
/// This is the data a DCP consumer forwards to its replica manifest.
pub fn get_system_event_data(value: &[u8]) -> Result<CollectionIdentifier, ManifestError> {
    let serialized: SerializedManifest =
        serde_json::from_slice(value).map_err(|source| ManifestError::Parse { source })?;
    let changed = serialized.changed.ok_or(ManifestError::MissingChangedEntry)?;
    Ok(CollectionIdentifier::new(changed.name, super::parse_uid(&changed.uid)?))
}

/// Extracts the separator from a separator-changed event payload.
pub fn get_system_event_separator(value: &[u8]) -> Result<String, ManifestError> {
    let serialized: SerializedManifest =
        serde_json::from_slice(value).map_err(|source| ManifestError::Parse { source })?;
    Ok(serialized.separator)
}

#[derive(Debug)]
struct ManifestData {
    separator: String,
    map: HashMap<String, ManifestEntry>,
    greatest_end_seqno: i64,
    n_deleting: usize,
}

impl ManifestData {
    fn serialize(&self, changed: Option<&CollectionIdentifier>) -> Vec<u8> {
        let entries = self
            .map
            .iter()
            .map(|(name, entry)| SerializedEntry {
                name: name.clone(),
                uid: format!("{:x}", entry.uid().value()),
                start_seqno: entry.start_seqno(),
                end_seqno: entry.end_seqno(),
            })
            .collect();
        let serialized = SerializedManifest {
            separator: self.separator.clone(),
            entries,
            changed: changed.map(|id| SerializedIdentifier {
                name: id.name.clone(),
                uid: format!("{:x}", id.uid.value()),
            }),
        };
        serde_json::to_vec(&serialized).unwrap_or_default()
    }

    fn only_default_tracked(&self) -> bool {
        self.map.keys().all(|name| name == DEFAULT_COLLECTION_NAME)
    }

    fn note_begin_delete(&mut self, end_seqno: i64) {
        self.n_deleting += 1;
        self.greatest_end_seqno = if self.greatest_end_seqno == STATE_COLLECTION_OPEN {
            end_seqno
        } else {
            self.greatest_end_seqno.max(end_seqno)
        };
    }

    fn note_complete_deletion(&mut self) {
        self.n_deleting = self.n_deleting.saturating_sub(1);
        if self.n_deleting == 0 {
            self.greatest_end_seqno = STATE_COLLECTION_OPEN;
        }
    }
}

/// Per-partition collections manifest.
///
/// Reads take the internal reader lock; updates take the writer lock for
/// the duration of the change, including the queueing of system events,
/// so an update's events are contiguous and ordered.
#[derive(Debug)]
pub struct VbManifest {
    data: RwLock<ManifestData>,
}

impl Default for VbManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl VbManifest {
    /// Creates the initial manifest: the default collection open since
    /// seqno 0, default separator, nothing deleting.
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            DEFAULT_COLLECTION_NAME.to_string(),
            ManifestEntry::new_open(DEFAULT_COLLECTION_UID, 0),
        );
        Self {
            data: RwLock::new(ManifestData {
                separator: DEFAULT_SEPARATOR.to_string(),
                map,
                greatest_end_seqno: STATE_COLLECTION_OPEN,
                n_deleting: 0,
            }),
        }
    }

    /// Rebuilds a manifest from a serialized payload (warmup, or the
    /// value of a received system event).
    pub fn from_serialized_value(value: &[u8]) -> Result<Self, ManifestError> {
        let serialized: SerializedManifest =
            serde_json::from_slice(value).map_err(|source| ManifestError::Parse { source })?;
        let mut map = HashMap::new();
        let mut greatest = STATE_COLLECTION_OPEN;
        let mut n_deleting = 0;
        for entry in serialized.entries {
            let uid = super::parse_uid(&entry.uid)?;
            let rebuilt = ManifestEntry::from_parts(uid, entry.start_seqno, entry.end_seqno);
            if rebuilt.is_deleting() {
                n_deleting += 1;
                greatest = if greatest == STATE_COLLECTION_OPEN {
                    rebuilt.end_seqno()
                } else {
                    greatest.max(rebuilt.end_seqno())
                };
            }
            map.insert(entry.name, rebuilt);
        }
        Ok(Self {
            data: RwLock::new(ManifestData {
                separator: serialized.separator,
                map,
                greatest_end_seqno: greatest,
                n_deleting,
            }),
        })
    }

    // ------------------------------------------------------------------
    // Active-side operations
    // ------------------------------------------------------------------

    /// Applies a new bucket manifest to an active partition.
    ///
    /// Computes the symmetric difference against the currently open
    /// generations, emits one system event per change, and leaves the
    /// manifest and checkpoint untouched on error. Re-applying the same
    /// manifest is a no-op.
    pub fn update(&self, vb: &VBucket, json: &str) -> Result<(), ManifestError> {
        let incoming = BucketManifest::parse(json)?;
        let ids = incoming.identifiers()?;

        let mut data = self.data.write();

        let separator_changed = incoming.separator != data.separator;
        if separator_changed && !data.only_default_tracked() {
            warn!(vb = %vb.id(), separator = %incoming.separator,
                  "rejecting separator change: non-default collections tracked");
            return Err(ManifestError::InvalidSeparator { separator: incoming.separator });
        }

        let deletions: Vec<CollectionIdentifier> = data
            .map
            .iter()
            .filter(|(name, entry)| {
                entry.is_open()
                    && !ids.iter().any(|id| id.name == **name && id.uid == entry.uid())
            })
            .map(|(name, entry)| CollectionIdentifier::new(name.clone(), entry.uid()))
            .collect();

        let additions: Vec<CollectionIdentifier> = ids
            .iter()
            .filter(|id| {
                !data
                    .map
                    .get(&id.name)
                    .map(|entry| entry.is_open() && entry.uid() == id.uid)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        if separator_changed {
            let separator = incoming.separator.clone();
            let d = &mut *data;
            d.separator = separator.clone();
            vb.queue_system_event_with(GenerateBySeqno::Yes, None, |seqno| {
                QueuedItem::system_event(
                    make_separator_event_key(&separator),
                    vb.id(),
                    d.serialize(None),
                    SystemEvent::CollectionsSeparatorChanged,
                    false,
                    seqno,
                    vb.now_secs(),
                )
            });
            info!(vb = %vb.id(), separator = %separator, "collections separator changed");
        }

        for id in &deletions {
            begin_delete_locked(&mut data, vb, id)?;
        }
        for id in &additions {
            add_collection_locked(&mut data, vb, id)?;
        }

        if !deletions.is_empty() || !additions.is_empty() {
            info!(vb = %vb.id(), added = additions.len(), deleting = deletions.len(),
                  "applied collections manifest");
        }
        Ok(())
    }

    /// Completes the deletion of a collection once its items are purged.
    ///
    /// An exclusive-deleting entry is removed (hard delete); the deleting
    /// half of an open-and-deleting entry is cleared (soft delete). The
    /// emitted event replays internally and is not transmitted over DCP.
    pub fn complete_deletion(&self, vb: &VBucket, name: &str) -> Result<(), ManifestError> {
        let mut data = self.data.write();
        let entry = *data
            .map
            .get(name)
            .ok_or_else(|| ManifestError::UnknownCollection { name: name.to_string() })?;
        if !entry.is_deleting() {
            return Err(ManifestError::NotDeleting { name: name.to_string() });
        }

        let event = if entry.is_open_and_deleting() {
            if let Some(entry) = data.map.get_mut(name) {
                entry.complete_deletion();
            }
            SystemEvent::DeleteCollectionSoft
        } else {
            data.map.remove(name);
            SystemEvent::DeleteCollectionHard
        };
        data.note_complete_deletion();

        let id = CollectionIdentifier::new(name.to_string(), entry.uid());
        let separator = data.separator.clone();
        let d = &mut *data;
        vb.queue_system_event_with(GenerateBySeqno::No, None, |seqno| {
            QueuedItem::system_event(
                make_delete_event_key(&id.name, &separator),
                vb.id(),
                d.serialize(Some(&id)),
                event,
                true,
                seqno,
                vb.now_secs(),
            )
        });
        info!(vb = %vb.id(), collection = %id, ?event, "completed collection deletion");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Replica-side operations
    // ------------------------------------------------------------------

    /// Applies a collection-create event received from the active.
    pub fn replica_add(
        &self,
        vb: &VBucket,
        id: &CollectionIdentifier,
        seqno: i64,
    ) -> Result<(), ManifestError> {
        let mut data = self.data.write();
        if data.map.get(&id.name).map(ManifestEntry::is_open).unwrap_or(false) {
            return Err(ManifestError::AlreadyOpen { name: id.name.clone() });
        }
        apply_add(&mut data, id, seqno);
        let separator = data.separator.clone();
        let d = &mut *data;
        vb.queue_system_event_with(GenerateBySeqno::No, Some(seqno), |event_seqno| {
            QueuedItem::system_event(
                make_collection_event_key(&id.name, &separator),
                vb.id(),
                d.serialize(Some(id)),
                SystemEvent::Collection,
                false,
                event_seqno,
                vb.now_secs(),
            )
        });
        Ok(())
    }

    /// Applies a collection-begin-delete event received from the active.
    pub fn replica_begin_delete(
        &self,
        vb: &VBucket,
        id: &CollectionIdentifier,
        seqno: i64,
    ) -> Result<(), ManifestError> {
        let mut data = self.data.write();
        let entry = data
            .map
            .get(&id.name)
            .copied()
            .ok_or_else(|| ManifestError::UnknownCollection { name: id.name.clone() })?;
        if !entry.is_open() {
            return Err(ManifestError::NotOpen { name: id.name.clone() });
        }
        apply_begin_delete(&mut data, &id.name, seqno);
        let separator = data.separator.clone();
        let d = &mut *data;
        vb.queue_system_event_with(GenerateBySeqno::No, Some(seqno), |event_seqno| {
            QueuedItem::system_event(
                make_collection_event_key(&id.name, &separator),
                vb.id(),
                d.serialize(Some(id)),
                SystemEvent::Collection,
                true,
                event_seqno,
                vb.now_secs(),
            )
        });
        Ok(())
    }

    /// Applies a separator-changed event received from the active.
    pub fn replica_change_separator(
        &self,
        vb: &VBucket,
        separator: &str,
        seqno: i64,
    ) -> Result<(), ManifestError> {
        let mut data = self.data.write();
        data.separator = separator.to_string();
        let d = &mut *data;
        vb.queue_system_event_with(GenerateBySeqno::No, Some(seqno), |event_seqno| {
            QueuedItem::system_event(
                make_separator_event_key(separator),
                vb.id(),
                d.serialize(None),
                SystemEvent::CollectionsSeparatorChanged,
                false,
                event_seqno,
                vb.now_secs(),
            )
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// True when an entry with this exact `(name, uid)` is tracked.
    pub fn exists(&self, id: &CollectionIdentifier) -> bool {
        self.data.read().map.get(&id.name).map(|e| e.uid() == id.uid).unwrap_or(false)
    }

    /// True when the identified entry has an open generation.
    pub fn is_open(&self, id: &CollectionIdentifier) -> bool {
        self.entry_matching(id).map(|e| e.is_open()).unwrap_or(false)
    }

    /// True when the identified entry is exclusive-open.
    pub fn is_exclusive_open(&self, id: &CollectionIdentifier) -> bool {
        self.entry_matching(id).map(|e| e.is_exclusive_open()).unwrap_or(false)
    }

    /// True when the identified entry has a deleting generation.
    pub fn is_deleting(&self, id: &CollectionIdentifier) -> bool {
        self.entry_matching(id).map(|e| e.is_deleting()).unwrap_or(false)
    }

    /// True when the identified entry is exclusive-deleting.
    pub fn is_exclusive_deleting(&self, id: &CollectionIdentifier) -> bool {
        self.entry_matching(id).map(|e| e.is_exclusive_deleting()).unwrap_or(false)
    }

    /// True when the identified entry is open-and-deleting.
    pub fn is_open_and_deleting(&self, id: &CollectionIdentifier) -> bool {
        self.entry_matching(id).map(|e| e.is_open_and_deleting()).unwrap_or(false)
    }

    /// Number of tracked entries.
    pub fn size(&self) -> usize {
        self.data.read().map.len()
    }

    /// Greatest end seqno across deleting entries, or the open sentinel.
    pub fn greatest_end_seqno(&self) -> i64 {
        self.data.read().greatest_end_seqno
    }

    /// Number of entries with a deleting generation.
    pub fn n_deleting_collections(&self) -> usize {
        self.data.read().n_deleting
    }

    /// Current key separator.
    pub fn separator(&self) -> String {
        self.data.read().separator.clone()
    }

    /// True when the key names a collection that is currently open.
    ///
    /// System keys are always valid; default-collection keys are valid
    /// while `$default` is open.
    pub fn does_key_contain_valid_collection(&self, key: &DocKey) -> bool {
        if key.namespace() == DocNamespace::System {
            return true;
        }
        let data = self.data.read();
        let Some(name) = key.collection_name(&data.separator) else {
            return false;
        };
        let Ok(name) = std::str::from_utf8(name) else {
            return false;
        };
        data.map.get(name).map(ManifestEntry::is_open).unwrap_or(false)
    }

    /// True when an item with this key and seqno sits inside a deleted
    /// generation of its collection.
    ///
    /// For a collection no longer tracked at all, any seqno at or below
    /// the greatest end seqno is considered deleted (the erasure sweep
    /// still owes those items a purge).
    pub fn is_logically_deleted(&self, key: &DocKey, seqno: i64) -> bool {
        if key.namespace() == DocNamespace::System {
            return false;
        }
        let data = self.data.read();
        let Some(name) = key.collection_name(&data.separator) else {
            return false;
        };
        let Ok(name) = std::str::from_utf8(name) else {
            return false;
        };
        match data.map.get(name) {
            Some(entry) => {
                entry.is_deleting()
                    && seqno <= entry.end_seqno()
                    && !(entry.is_open() && entry.start_seqno() <= seqno)
            }
            None => seqno <= data.greatest_end_seqno,
        }
    }

    /// Public JSON emission: open generations only.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Public<'a> {
            separator: &'a str,
            collections: Vec<PublicEntry>,
        }
        #[derive(Serialize)]
        struct PublicEntry {
            name: String,
            uid: String,
        }
        let data = self.data.read();
        let collections = data
            .map
            .iter()
            .filter(|(_, entry)| entry.is_open())
            .map(|(name, entry)| PublicEntry {
                name: name.clone(),
                uid: format!("{:x}", entry.uid().value()),
            })
            .collect();
        let public = Public { separator: &data.separator, collections };
        serde_json::to_string(&public).unwrap_or_default()
    }

    /// Full serialization of the current state (no changed entry).
    pub fn to_serialized_value(&self) -> Vec<u8> {
        self.data.read().serialize(None)
    }

    /// Copy of the entry tracked under `name`.
    pub fn entry(&self, name: &str) -> Option<ManifestEntry> {
        self.data.read().map.get(name).copied()
    }

    /// Structural equality: same entries, same seqnos, same separator.
    pub fn equals(&self, other: &VbManifest) -> bool {
        let a = self.data.read();
        let b = other.data.read();
        a.separator == b.separator && a.map == b.map
    }

    fn entry_matching(&self, id: &CollectionIdentifier) -> Option<ManifestEntry> {
        self.data.read().map.get(&id.name).copied().filter(|e| e.uid() == id.uid)
    }
}

fn apply_add(data: &mut ManifestData, id: &CollectionIdentifier, seqno: i64) {
    match data.map.get_mut(&id.name) {
        Some(entry) => entry.reopen(id.uid, seqno),
        None => {
            data.map.insert(id.name.clone(), ManifestEntry::new_open(id.uid, seqno));
        }
    }
}

fn apply_begin_delete(data: &mut ManifestData, name: &str, seqno: i64) {
    if let Some(entry) = data.map.get_mut(name) {
        entry.mark_deleting(seqno);
    }
    data.note_begin_delete(seqno);
}

fn add_collection_locked(
    data: &mut ManifestData,
    vb: &VBucket,
    id: &CollectionIdentifier,
) -> Result<(), ManifestError> {
    if data.map.get(&id.name).map(ManifestEntry::is_open).unwrap_or(false) {
        return Err(ManifestError::AlreadyOpen { name: id.name.clone() });
    }
    let separator = data.separator.clone();
    vb.queue_system_event_with(GenerateBySeqno::Yes, None, |seqno| {
        apply_add(data, id, seqno);
        QueuedItem::system_event(
            make_collection_event_key(&id.name, &separator),
            vb.id(),
            data.serialize(Some(id)),
            SystemEvent::Collection,
            false,
            seqno,
            vb.now_secs(),
        )
    });
    Ok(())
}

fn begin_delete_locked(
    data: &mut ManifestData,
    vb: &VBucket,
    id: &CollectionIdentifier,
) -> Result<(), ManifestError> {
    if !data.map.contains_key(&id.name) {
        return Err(ManifestError::UnknownCollection { name: id.name.clone() });
    }
    let separator = data.separator.clone();
    vb.queue_system_event_with(GenerateBySeqno::Yes, None, |seqno| {
        apply_begin_delete(data, &id.name, seqno);
        QueuedItem::system_event(
            make_collection_event_key(&id.name, &separator),
            vb.id(),
            data.serialize(Some(id)),
            SystemEvent::Collection,
            true,
            seqno,
            vb.now_secs(),
        )
    });
    Ok(())
}
