//! Document keys and collection namespaces.
//!
//! Every key entering the data plane is tagged with a namespace: the
//! default collection, a named collection, or the reserved system-event
//! space. Named-collection keys embed the collection name and a
//! configurable separator ahead of the user portion:
//!
//! Key format: `{collection_name}{separator}{user_key}`
//!
//! System-event keys carry the reserved `$collections` prefix and are
//! produced only by the manifest.

use std::fmt;

/// The reserved name of the system-owned default collection.
pub const DEFAULT_COLLECTION_NAME: &str = "$default";

/// The default separator for identifying collections in keys.
pub const DEFAULT_SEPARATOR: &str = "::";

/// Reserved prefix of system-event keys.
pub const SYSTEM_EVENT_PREFIX: &str = "$collections";

/// System-event key suffix for collection deletion events.
pub const DELETE_EVENT_KEY: &str = "delete";

/// System-event key suffix for separator-changed events.
pub const SEPARATOR_CHANGED_KEY: &str = "separator";

/// Reserved local document name for the persisted manifest.
pub const LOCAL_MANIFEST_KEY: &str = "_local/collections_manifest";

/// Namespace a document key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocNamespace {
    /// Keys without a collection prefix; logically in `$default`.
    DefaultCollection,
    /// Keys carrying `collection_name{separator}` ahead of the user key.
    Collections,
    /// Reserved keys produced by the manifest for replication.
    System,
}

/// An opaque key byte sequence tagged with its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    namespace: DocNamespace,
    bytes: Vec<u8>,
}

impl DocKey {
    /// Creates a key in the given namespace.
    pub fn new(bytes: impl Into<Vec<u8>>, namespace: DocNamespace) -> Self {
        Self { namespace, bytes: bytes.into() }
    }

    /// Creates a default-collection key.
    pub fn default_collection(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, DocNamespace::DefaultCollection)
    }

    /// Creates a named-collection key from its already-joined bytes.
    pub fn collection(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, DocNamespace::Collections)
    }

    /// Key bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Namespace tag.
    pub fn namespace(&self) -> DocNamespace {
        self.namespace
    }

    /// Splits a named-collection key into `(collection_name, user_key)`.
    ///
    /// Returns `None` when the key is not in the collections namespace or
    /// does not contain the separator.
    pub fn split_collection<'a>(&'a self, separator: &str) -> Option<(&'a [u8], &'a [u8])> {
        if self.namespace != DocNamespace::Collections {
            return None;
        }
        let sep = separator.as_bytes();
        if sep.is_empty() || self.bytes.len() < sep.len() {
            return None;
        }
        self.bytes
            .windows(sep.len())
            .position(|w| w == sep)
            .map(|at| (&self.bytes[..at], &self.bytes[at + sep.len()..]))
    }

    /// Name of the collection this key logically belongs to.
    ///
    /// Default-collection keys resolve to [`DEFAULT_COLLECTION_NAME`];
    /// system keys have no owning collection.
    pub fn collection_name<'a>(&'a self, separator: &str) -> Option<&'a [u8]> {
        match self.namespace {
            DocNamespace::DefaultCollection => Some(DEFAULT_COLLECTION_NAME.as_bytes()),
            DocNamespace::Collections => self.split_collection(separator).map(|(name, _)| name),
            DocNamespace::System => None,
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

/// Builds the system-event key announcing a collection's creation.
pub fn make_collection_event_key(name: &str, separator: &str) -> DocKey {
    DocKey::new(
        format!("{SYSTEM_EVENT_PREFIX}{separator}{name}").into_bytes(),
        DocNamespace::System,
    )
}

/// Builds the system-event key announcing a collection's deletion.
pub fn make_delete_event_key(name: &str, separator: &str) -> DocKey {
    DocKey::new(
        format!("{SYSTEM_EVENT_PREFIX}{separator}{DELETE_EVENT_KEY}:{name}").into_bytes(),
        DocNamespace::System,
    )
}

/// Builds the system-event key announcing a separator change.
pub fn make_separator_event_key(separator: &str) -> DocKey {
    DocKey::new(
        format!("{SYSTEM_EVENT_PREFIX}{separator}{SEPARATOR_CHANGED_KEY}").into_bytes(),
        DocNamespace::System,
    )
}
