//! Collections: logical key subspaces with per-partition lifecycle.
//!
//! The bucket-level manifest declares which collections exist; each
//! partition tracks its own view in a [`VbManifest`], emitting replay-able
//! system events into the checkpoint stream so replicas converge on the
//! same state at the same seqnos.

mod entry;
mod manifest;

pub use entry::{ManifestEntry, STATE_COLLECTION_OPEN};
pub use manifest::{
    SerializedEntry, SerializedIdentifier, SerializedManifest, VbManifest,
    get_system_event_data, get_system_event_separator,
};

use driftkv_types::key::DEFAULT_COLLECTION_NAME;
use driftkv_types::CollectionUid;
use serde::Deserialize;
use snafu::Snafu;

/// Manifest event subtypes carried in a system-event item's flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemEvent {
    /// A collection generation was created or begin-deleted (the item's
    /// deleted bit distinguishes the two).
    Collection = 0,
    /// The key separator changed.
    CollectionsSeparatorChanged = 1,
    /// A soft deletion completed: the name lives on under a newer uid.
    DeleteCollectionSoft = 2,
    /// A hard deletion completed: the collection is gone.
    DeleteCollectionHard = 3,
}

impl TryFrom<u32> for SystemEvent {
    type Error = ManifestError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SystemEvent::Collection),
            1 => Ok(SystemEvent::CollectionsSeparatorChanged),
            2 => Ok(SystemEvent::DeleteCollectionSoft),
            3 => Ok(SystemEvent::DeleteCollectionHard),
            other => Err(ManifestError::UnknownEvent { code: other }),
        }
    }
}

/// A `(name, uid)` pair locating one generation of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionIdentifier {
    /// Collection name.
    pub name: String,
    /// Generation number.
    pub uid: CollectionUid,
}

impl CollectionIdentifier {
    /// Creates an identifier.
    pub fn new(name: impl Into<String>, uid: impl Into<CollectionUid>) -> Self {
        Self { name: name.into(), uid: uid.into() }
    }

    /// True for the reserved default collection.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_COLLECTION_NAME
    }
}

impl std::fmt::Display for CollectionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:x}", self.name, self.uid.value())
    }
}

/// Errors from manifest parsing and lifecycle operations.
#[derive(Debug, Snafu)]
pub enum ManifestError {
    /// The manifest JSON failed to parse.
    #[snafu(display("cannot parse manifest: {source}"))]
    Parse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A collection uid was not a valid hexadecimal u64.
    #[snafu(display("invalid collection uid {uid:?}"))]
    InvalidUid {
        /// The offending uid string.
        uid: String,
    },

    /// A separator change was requested while non-default collections
    /// are tracked.
    #[snafu(display("cannot change separator to {separator:?}: non-default collections exist"))]
    InvalidSeparator {
        /// The rejected separator.
        separator: String,
    },

    /// The named collection is not tracked by this partition.
    #[snafu(display("unknown collection {name:?}"))]
    UnknownCollection {
        /// Collection name.
        name: String,
    },

    /// The collection exists but has no deleting generation.
    #[snafu(display("collection {name:?} is not being deleted"))]
    NotDeleting {
        /// Collection name.
        name: String,
    },

    /// A generation was added over an already-open generation.
    #[snafu(display("collection {name:?} is already open"))]
    AlreadyOpen {
        /// Collection name.
        name: String,
    },

    /// A begin-delete arrived for a collection with no open generation.
    #[snafu(display("collection {name:?} has no open generation"))]
    NotOpen {
        /// Collection name.
        name: String,
    },

    /// A system-event payload was missing required data.
    #[snafu(display("system event payload is missing its changed entry"))]
    MissingChangedEntry,

    /// A system-event subtype code was not recognised.
    #[snafu(display("unknown system event code {code}"))]
    UnknownEvent {
        /// The offending code.
        code: u32,
    },
}

/// Bucket-level manifest as supplied by the cluster manager.
///
/// The JSON shape is `{"separator": "::", "collections": [{"name": ...,
/// "uid": "<hex>"}, ...]}`; uids are hexadecimal strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketManifest {
    /// Key separator for named collections.
    pub separator: String,
    /// Declared collections.
    pub collections: Vec<BucketManifestEntry>,
}

/// One collection declaration in a bucket manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketManifestEntry {
    /// Collection name.
    pub name: String,
    /// Generation number as a hexadecimal string.
    pub uid: String,
}

impl BucketManifest {
    /// Parses a bucket manifest from JSON.
    pub fn parse(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|source| ManifestError::Parse { source })
    }

    /// Resolves the declared collections into typed identifiers.
    pub fn identifiers(&self) -> Result<Vec<CollectionIdentifier>, ManifestError> {
        self.collections.iter().map(|entry| entry.identifier()).collect()
    }
}

impl BucketManifestEntry {
    fn identifier(&self) -> Result<CollectionIdentifier, ManifestError> {
        let uid = parse_uid(&self.uid)?;
        Ok(CollectionIdentifier::new(self.name.clone(), uid))
    }
}

/// Parses a hexadecimal uid string.
pub fn parse_uid(uid: &str) -> Result<CollectionUid, ManifestError> {
    u64::from_str_radix(uid, 16)
        .map(CollectionUid::new)
        .map_err(|_| ManifestError::InvalidUid { uid: uid.to_string() })
}
