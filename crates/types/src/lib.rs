//! Core type definitions for DriftKV.
//!
//! This crate holds the vocabulary shared by every other DriftKV crate:
//!
//! - Identifier newtypes ([`Vbid`], [`CollectionUid`], [`CookieId`])
//! - Document keys with collection namespaces ([`key::DocKey`])
//! - The protocol-visible datatype bitset ([`datatype::Datatype`])
//! - Engine status codes surfaced to workers ([`Status`])
//! - The Hybrid Logical Clock ([`hlc::HybridLogicalClock`])
//! - An adjustable wall clock for expiry decisions ([`clock::WallClock`])
//! - Configuration structs with validating builders ([`config`])

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod datatype;
pub mod hlc;
pub mod key;
mod status;
mod types;

pub use status::Status;
pub use types::{
    BucketType, CollectionUid, CookieId, EvictionPolicy, GenerateBySeqno, GenerateCas,
    QueueExpired, SnapshotRange, StoreOperation, TrackReference, VbState, Vbid, WantsDeleted,
    DEFAULT_COLLECTION_UID,
};
