//! Persistence collaborator contract.
//!
//! The core only names the interface the `backend` configuration key
//! selects: document set/delete/fetch per partition, and the persisted
//! collections manifest stored under the reserved local document name.
//! [`MemoryKvStore`] is the in-memory double used by tests and the
//! ephemeral bucket flavour.

use std::collections::HashMap;

use driftkv_types::config::KvStoreConfig;
use driftkv_types::key::{DocKey, LOCAL_MANIFEST_KEY};
use driftkv_types::{Status, Vbid};
use parking_lot::Mutex;

use crate::checkpoint::QueuedItem;
use crate::stored_value::Item;

/// Result of a background fetch from storage.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Storage outcome (`Success`, `KeyNoent`, or a failure).
    pub status: Status,
    /// The fetched document on success.
    pub item: Option<Item>,
}

impl FetchResult {
    /// A successful fetch.
    pub fn found(item: Item) -> Self {
        Self { status: Status::Success, item: Some(item) }
    }

    /// A definitive miss.
    pub fn missing() -> Self {
        Self { status: Status::KeyNoent, item: None }
    }

    /// A storage failure.
    pub fn failed() -> Self {
        Self { status: Status::Failed, item: None }
    }
}

/// Persistence backend interface.
pub trait KvStore: Send + Sync {
    /// Persists one drained queue item (mutation or deletion).
    fn persist(&self, item: &QueuedItem);

    /// Fetches a document for a background fetch.
    fn fetch(&self, vbid: Vbid, key: &DocKey) -> FetchResult;

    /// Writes the partition's serialized collections manifest to the
    /// reserved local document.
    fn persist_manifest(&self, vbid: Vbid, manifest: Vec<u8>);

    /// Reads back the persisted collections manifest, if any.
    fn read_manifest(&self, vbid: Vbid) -> Option<Vec<u8>>;
}

#[derive(Debug, Default)]
struct MemoryShard {
    docs: HashMap<(u16, Vec<u8>), Item>,
    local: HashMap<(u16, &'static str), Vec<u8>>,
}

/// In-memory persistence backend.
#[derive(Debug)]
pub struct MemoryKvStore {
    config: KvStoreConfig,
    shard: Mutex<MemoryShard>,
}

impl MemoryKvStore {
    /// Creates an empty store for one shard.
    pub fn new(config: KvStoreConfig) -> Self {
        Self { config, shard: Mutex::new(MemoryShard::default()) }
    }

    /// The shard configuration this store was built with.
    pub fn config(&self) -> &KvStoreConfig {
        &self.config
    }

    /// Number of documents currently persisted.
    pub fn num_docs(&self) -> usize {
        self.shard.lock().docs.len()
    }
}

impl KvStore for MemoryKvStore {
    fn persist(&self, item: &QueuedItem) {
        let mut shard = self.shard.lock();
        let key = (item.vbid().value(), item.key().data().to_vec());
        if item.is_deleted() {
            shard.docs.remove(&key);
        } else {
            let doc = Item {
                key: item.key().clone(),
                vbid: item.vbid(),
                value: item.value().to_vec(),
                flags: item.flags(),
                exptime: item.exptime(),
                datatype: item.datatype(),
                cas: item.cas(),
                seqno: item.seqno(),
                rev_seqno: 1,
            };
            shard.docs.insert(key, doc);
        }
    }

    fn fetch(&self, vbid: Vbid, key: &DocKey) -> FetchResult {
        let shard = self.shard.lock();
        match shard.docs.get(&(vbid.value(), key.data().to_vec())) {
            Some(item) => FetchResult::found(item.clone()),
            None => FetchResult::missing(),
        }
    }

    fn persist_manifest(&self, vbid: Vbid, manifest: Vec<u8>) {
        self.shard.lock().local.insert((vbid.value(), LOCAL_MANIFEST_KEY), manifest);
    }

    fn read_manifest(&self, vbid: Vbid) -> Option<Vec<u8>> {
        self.shard.lock().local.get(&(vbid.value(), LOCAL_MANIFEST_KEY)).cloned()
    }
}
