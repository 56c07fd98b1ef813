//! Identifier newtypes and small shared enums.
//!
//! These types align with the partition data plane's vocabulary:
//! - Identifier types (Vbid, CollectionUid, CookieId)
//! - Partition state and eviction policy
//! - Binary-choice enums used instead of bare `bool` arguments

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `vb:12`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a single key-range partition (virtual bucket).
    ///
    /// Wraps a `u16` with compile-time type safety to prevent mixing with
    /// other identifier types.
    ///
    /// # Display
    ///
    /// Formats with `vb:` prefix: `vb:512`.
    Vbid, u16, "vb"
);

define_id!(
    /// Generation number of a collection within a bucket.
    ///
    /// A `(name, uid)` pair uniquely identifies one generation of a
    /// collection; a later generation may reuse the name with a new uid
    /// once the prior generation has begun deletion.
    CollectionUid, u64, "uid"
);

define_id!(
    /// Opaque handle for a client connection cookie.
    ///
    /// Cookies are owned by the connection layer; the core only stores
    /// them as notification keys and never dereferences them.
    CookieId, u64, "cookie"
);

/// The reserved uid of the default collection.
pub const DEFAULT_COLLECTION_UID: CollectionUid = CollectionUid::new(0);

// ============================================================================
// Partition state
// ============================================================================

/// Lifecycle state of a partition.
///
/// Transitions are externally driven by the cluster manager; the partition
/// logs every transition and adjusts pending work accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VbState {
    /// Serves reads and writes; the authoritative copy.
    Active,
    /// Passively applies the active's replication stream.
    Replica,
    /// Transitioning towards active; client operations are parked.
    Pending,
    /// Not part of the cluster map; all operations are rejected.
    Dead,
}

impl fmt::Display for VbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VbState::Active => "active",
            VbState::Replica => "replica",
            VbState::Pending => "pending",
            VbState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Item eviction policy for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only evict an item's value; metadata stays resident.
    ValueOnly,
    /// Evict key, metadata and value together.
    FullEviction,
}

/// Bucket flavour selected by the `bucket_type` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BucketType {
    /// Mutations are flushed to a persistence backend.
    Persistent,
    /// Memory-only; replicas are the sole redundancy.
    Ephemeral,
}

/// The store operation requested by a mutation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Store regardless of prior existence.
    Set,
    /// Store only if the key does not exist.
    Add,
    /// Store only if the key already exists.
    Replace,
    /// Append to an existing value.
    Append,
    /// Prepend to an existing value.
    Prepend,
    /// Compare-and-swap against the request's input CAS.
    Cas,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreOperation::Set => "set",
            StoreOperation::Add => "add",
            StoreOperation::Replace => "replace",
            StoreOperation::Append => "append",
            StoreOperation::Prepend => "prepend",
            StoreOperation::Cas => "cas",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Binary-choice enums
// ============================================================================

/// Whether queueing an item assigns a fresh sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateBySeqno {
    /// Keep the item's existing seqno (replica replay).
    No,
    /// Assign the next seqno for the partition.
    Yes,
}

/// Whether queueing an item mints a fresh CAS from the HLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateCas {
    /// Keep the item's existing CAS.
    No,
    /// Mint a new CAS.
    Yes,
}

/// Whether a lookup should return soft-deleted entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantsDeleted {
    /// Deleted entries are treated as absent.
    No,
    /// Deleted entries are returned.
    Yes,
}

/// Whether a lookup refreshes the entry's NRU reference age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReference {
    /// Leave the NRU counter unchanged.
    No,
    /// Mark the entry recently used.
    Yes,
}

/// Whether an expired entry found during a lookup is queued for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueExpired {
    /// Only observe; leave expiry to the pager.
    No,
    /// Soft-delete and queue the expiration.
    Yes,
}

// ============================================================================
// Snapshot range
// ============================================================================

/// Inclusive seqno range of a replication snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRange {
    /// First seqno covered by the snapshot.
    pub start: u64,
    /// Last seqno covered by the snapshot.
    pub end: u64,
}

impl SnapshotRange {
    /// Creates a snapshot range.
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}
