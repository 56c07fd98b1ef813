//! DriftKV memcached-binary-protocol front-end.
//!
//! The pieces a worker thread runs for one request:
//!
//! - [`header`] - 24-byte request/response header codec
//! - [`validators`] - per-opcode structural request validation
//! - [`context`] - the GET and mutation command state machines
//! - [`ioctl`] - the thin administrative get/set dispatch
//!
//! Command contexts drive the engine ([`driftkv_kv::Bucket`]) and release
//! the worker whenever the engine answers `WouldBlock`; the owning
//! connection re-drives `step()` once the background work completes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
mod features;
pub mod header;
pub mod ioctl;
pub mod validators;
mod xattr;

pub use features::{ClientFeatures, Connection, ConnectionState, McbpStats, Response};
pub use xattr::{get_body, validate_xattr_blob};

/// Inflation seam for snappy-compressed payloads.
///
/// Compression itself is an external collaborator; the GET context only
/// names this contract.
pub trait PayloadInflater: Send + Sync {
    /// Decompresses `payload`, or `None` when the data is malformed.
    fn inflate(&self, payload: &[u8]) -> Option<Vec<u8>>;
}

/// Pass-through inflater for tests and uncompressed deployments.
#[derive(Debug, Default)]
pub struct IdentityInflater;

impl PayloadInflater for IdentityInflater {
    fn inflate(&self, payload: &[u8]) -> Option<Vec<u8>> {
        Some(payload.to_vec())
    }
}
