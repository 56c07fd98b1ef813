//! Failover log: opaque UUID/seqno pairs returned to clients.
//!
//! Each entry marks a point in history a client may resume a stream from.
//! Entries are immutable once created; a new entry is prepended whenever
//! the partition takes over as active after a failover.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One failover log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEntry {
    /// Opaque identity of this branch of history.
    pub id: u64,
    /// Seqno at which this branch began.
    pub seq: u64,
}

/// Ordered failover history, newest entry first.
#[derive(Debug)]
pub struct FailoverTable {
    entries: Mutex<Vec<FailoverEntry>>,
}

impl FailoverTable {
    /// Creates a table with one fresh entry starting at seqno 0.
    pub fn new() -> Self {
        Self { entries: Mutex::new(vec![FailoverEntry { id: fresh_uuid(), seq: 0 }]) }
    }

    /// Rebuilds a table from persisted entries.
    ///
    /// Falls back to a fresh table when no entries were persisted.
    pub fn from_entries(entries: Vec<FailoverEntry>) -> Self {
        if entries.is_empty() {
            return Self::new();
        }
        Self { entries: Mutex::new(entries) }
    }

    /// UUID of the newest entry.
    pub fn latest_uuid(&self) -> u64 {
        self.entries.lock().first().map(|e| e.id).unwrap_or(0)
    }

    /// Prepends a new entry starting at `high_seqno`.
    pub fn create_entry(&self, high_seqno: u64) {
        let mut entries = self.entries.lock();
        entries.insert(0, FailoverEntry { id: fresh_uuid(), seq: high_seqno });
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// JSON emission of the full table, newest first.
    pub fn to_json(&self) -> String {
        let entries = self.entries.lock();
        serde_json::to_string(&*entries).unwrap_or_else(|_| "[]".to_string())
    }
}

impl Default for FailoverTable {
    fn default() -> Self {
        Self::new()
    }
}

fn fresh_uuid() -> u64 {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
