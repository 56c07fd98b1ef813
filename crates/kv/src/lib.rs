//! The DriftKV data plane.
//!
//! This crate implements the per-partition in-memory machinery that every
//! client mutation and replication stream touches:
//!
//! - [`StoredValue`] / [`HashTable`] - the in-memory item index
//! - [`CheckpointManager`] - the ordered, snapshot-bounded write queue
//! - [`collections::VbManifest`] - the per-partition collections state machine
//! - [`FilterPair`] - bloom-filter existence hints with live compaction swap
//! - [`FailoverTable`] - opaque UUID/seqno history handed to clients
//! - [`VBucket`] - the partition aggregate
//! - [`Bucket`] - the bucket registry and engine facade
//! - [`ExpiryPager`] / [`ItemPager`] - background memory reclamation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bloom;
mod bucket;
mod checkpoint;
pub mod collections;
mod failover;
mod hash_table;
mod kvstore;
mod notify;
mod pager;
mod stats;
mod stored_value;
mod vbucket;

pub use bloom::{BloomFilter, FilterPair, FilterStatus};
pub use bucket::{Bucket, GetOptions, GetResult, StoreResult};
pub use checkpoint::{
    CheckpointManager, QueueDirtyResult, QueueOp, QueuedItem, PERSISTENCE_CURSOR,
};
pub use failover::{FailoverEntry, FailoverTable};
pub use hash_table::{HashTable, HashTableGuard};
pub use kvstore::{FetchResult, KvStore, MemoryKvStore};
pub use notify::{CollectingNotifier, IoNotifier, NullNotifier};
pub use pager::{ExpiryPager, ItemPager};
pub use stats::KvStats;
pub use stored_value::{Item, StoredValue, INITIAL_NRU, MAX_NRU};
pub use vbucket::{BgFetchCtx, BgFetchItem, ExpireBy, HighPriorityNotify, VBucket};
