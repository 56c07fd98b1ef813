//! The mutation command state machine (SET / ADD / REPLACE / APPEND /
//! PREPEND / CAS).

use driftkv_kv::{Bucket, Item};
use driftkv_types::datatype::Datatype;
use driftkv_types::key::DocKey;
use driftkv_types::{CookieId, Status, StoreOperation, Vbid};

use crate::features::{Connection, ConnectionState, Response};

/// States of a mutation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Check datatype and speculatively detect JSON.
    ValidateInput,
    /// Reserve the new item and copy the value in.
    AllocateNewItem,
    /// Run the engine store.
    StoreItem,
    /// Assemble the response.
    SendResponse,
    /// Finished.
    Done,
}

/// Context for one mutation request.
pub struct MutationCommandContext<'a> {
    bucket: &'a Bucket,
    connection: &'a mut Connection,
    operation: StoreOperation,
    key: DocKey,
    vbid: Vbid,
    cookie: CookieId,
    value: Vec<u8>,
    flags: u32,
    expiration: u32,
    input_cas: u64,
    datatype: Datatype,
    state: MutationState,
    new_item: Option<Item>,
    stored_cas: u64,
    stored_seqno: i64,
}

impl<'a> MutationCommandContext<'a> {
    /// Creates a context for a decoded mutation request.
    ///
    /// A non-zero request CAS turns the operation into a CAS store,
    /// whatever the opcode asked for.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket: &'a Bucket,
        connection: &'a mut Connection,
        operation: StoreOperation,
        key: DocKey,
        vbid: Vbid,
        cookie: CookieId,
        value: Vec<u8>,
        flags: u32,
        expiration: u32,
        input_cas: u64,
        datatype: Datatype,
    ) -> Self {
        let operation = if input_cas == 0 { operation } else { StoreOperation::Cas };
        Self {
            bucket,
            connection,
            operation,
            key,
            vbid,
            cookie,
            value,
            flags,
            expiration,
            input_cas,
            datatype,
            state: MutationState::ValidateInput,
            new_item: None,
            stored_cas: 0,
            stored_seqno: 0,
        }
    }

    /// The effective store operation.
    pub fn operation(&self) -> StoreOperation {
        self.operation
    }

    /// Current state, for re-drive diagnostics.
    pub fn state(&self) -> MutationState {
        self.state
    }

    /// Drives the context until it completes or must block.
    pub fn step(&mut self) -> Status {
        let ret = loop {
            let ret = match self.state {
                MutationState::ValidateInput => self.validate_input(),
                MutationState::AllocateNewItem => self.allocate_new_item(),
                MutationState::StoreItem => self.store_item(),
                MutationState::SendResponse => self.send_response(),
                MutationState::Done => {
                    if self.operation == StoreOperation::Cas {
                        self.connection.incr_stat(&self.connection.stats().cas_hits);
                    } else {
                        self.connection.incr_stat(&self.connection.stats().cmd_set);
                    }
                    return Status::Success;
                }
            };
            if ret != Status::Success {
                break ret;
            }
        };

        // Error-path accounting. Like the original, cmd_set is charged
        // here as well as in Done, so retried commands that eventually
        // succeed count slightly high in some failure modes.
        if ret != Status::WouldBlock {
            if self.operation == StoreOperation::Cas {
                match ret {
                    Status::KeyExists => {
                        self.connection.incr_stat(&self.connection.stats().cas_badval);
                    }
                    Status::KeyNoent => {
                        self.connection.incr_stat(&self.connection.stats().cas_misses);
                    }
                    _ => {}
                }
            } else {
                self.connection.incr_stat(&self.connection.stats().cmd_set);
            }
        }
        ret
    }

    fn validate_input(&mut self) -> Status {
        if !self.connection.features.datatype {
            if !self.datatype.is_raw() {
                return Status::Einval;
            }
            // The client cannot tag JSON itself; detect it here so
            // downstream consumers see the right datatype.
            if serde_json::from_slice::<serde_json::Value>(&self.value).is_ok() {
                self.datatype = Datatype::JSON;
            }
        }
        self.state = MutationState::AllocateNewItem;
        Status::Success
    }

    fn allocate_new_item(&mut self) -> Status {
        if !self.bucket.stats().has_memory_for(self.value.len() + self.key.len()) {
            return Status::Enomem;
        }
        let mut item = Item::new(
            self.key.clone(),
            self.vbid,
            self.value.clone(),
            self.flags,
            self.expiration,
            self.datatype,
        );
        item.cas = self.input_cas;
        self.new_item = Some(item);
        self.state = MutationState::StoreItem;
        Status::Success
    }

    fn store_item(&mut self) -> Status {
        let Some(item) = self.new_item.as_ref() else {
            return Status::Failed;
        };
        let result = self.bucket.store(item, self.operation, self.cookie);
        match result.status {
            Status::Success => {
                self.stored_cas = result.cas;
                self.stored_seqno = result.seqno;
                self.connection.set_cas(result.cas);
                self.state = MutationState::SendResponse;
                Status::Success
            }
            other => other.remap_not_stored(self.operation),
        }
    }

    fn send_response(&mut self) -> Status {
        self.state = MutationState::Done;

        if self.connection.noreply {
            self.connection.set_state(ConnectionState::NewCmd);
            return Status::Success;
        }

        if self.connection.features.mutation_seqno {
            // Response carries (vbucket_uuid, seqno) in network byte
            // order alongside the CAS.
            let uuid = self.bucket.vbucket_uuid(self.vbid).unwrap_or(0);
            let mut extras = Vec::with_capacity(16);
            extras.extend_from_slice(&uuid.to_be_bytes());
            extras.extend_from_slice(&(self.stored_seqno as u64).to_be_bytes());
            self.connection.set_response(Response {
                status: 0,
                datatype: Datatype::RAW,
                cas: self.stored_cas,
                extras,
                key: Vec::new(),
                value: Vec::new(),
            });
        } else {
            self.connection.write_packet(0);
        }
        Status::Success
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use driftkv_kv::{IoNotifier, KvStore, MemoryKvStore, NullNotifier};
    use driftkv_types::clock::WallClock;
    use driftkv_types::config::{KvConfig, KvStoreConfig};
    use driftkv_types::{EvictionPolicy, VbState};

    use super::*;
    use crate::features::McbpStats;

    fn bucket() -> Bucket {
        let config = KvConfig::builder().max_vbuckets(1).ht_size(17).build().unwrap();
        let store = Arc::new(MemoryKvStore::new(KvStoreConfig::from_config(&config, 0)));
        let bucket = Bucket::new(
            config,
            EvictionPolicy::ValueOnly,
            Arc::new(WallClock::new()),
            Arc::new(NullNotifier) as Arc<dyn IoNotifier>,
            store as Arc<dyn KvStore>,
        )
        .unwrap();
        bucket.set_vbucket_state(Vbid::new(0), VbState::Active);
        bucket
    }

    fn connection() -> Connection {
        Connection::new(Arc::new(McbpStats::new()))
    }

    fn run(
        bucket: &Bucket,
        connection: &mut Connection,
        operation: StoreOperation,
        key: &[u8],
        value: &[u8],
        cas: u64,
    ) -> (Status, u64) {
        let mut ctx = MutationCommandContext::new(
            bucket,
            connection,
            operation,
            DocKey::default_collection(key.to_vec()),
            Vbid::new(0),
            CookieId::new(1),
            value.to_vec(),
            0,
            0,
            cas,
            Datatype::RAW,
        );
        let status = ctx.step();
        (status, ctx.stored_cas)
    }

    // SET, ADD on an existing key, CAS replay: the full round-trip of
    // conditional stores as a client sees it.
    #[test]
    fn test_set_add_cas_roundtrip() {
        let bucket = bucket();
        let mut connection = connection();

        let (status, cas1) = run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v", 0);
        assert_eq!(status, Status::Success);
        assert_ne!(cas1, 0);

        let (status, _) = run(&bucket, &mut connection, StoreOperation::Add, b"k", b"v2", 0);
        assert_eq!(status, Status::KeyExists, "ADD on existing key remaps NotStored");

        let (status, cas2) = run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v2", cas1);
        assert_eq!(status, Status::Success);
        assert!(cas2 > cas1);

        let (status, _) = run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v3", cas1);
        assert_eq!(status, Status::KeyExists, "stale CAS must fail");
    }

    #[test]
    fn test_replace_missing_remaps_to_enoent() {
        let bucket = bucket();
        let mut connection = connection();
        let (status, _) =
            run(&bucket, &mut connection, StoreOperation::Replace, b"missing", b"v", 0);
        assert_eq!(status, Status::KeyNoent);
    }

    #[test]
    fn test_json_detection_without_datatype_support() {
        let bucket = bucket();
        let mut connection = connection();
        let (status, _) = run(
            &bucket,
            &mut connection,
            StoreOperation::Set,
            b"doc",
            br#"{"field": 1}"#,
            0,
        );
        assert_eq!(status, Status::Success);
        let stored = bucket
            .get(
                &DocKey::default_collection(b"doc".to_vec()),
                Vbid::new(0),
                CookieId::new(1),
                driftkv_kv::GetOptions::default(),
            )
            .item
            .unwrap();
        assert!(stored.datatype.is_json(), "valid JSON should be upgraded");

        let (status, _) =
            run(&bucket, &mut connection, StoreOperation::Set, b"blob", b"not json", 0);
        assert_eq!(status, Status::Success);
        let stored = bucket
            .get(
                &DocKey::default_collection(b"blob".to_vec()),
                Vbid::new(0),
                CookieId::new(1),
                driftkv_kv::GetOptions::default(),
            )
            .item
            .unwrap();
        assert!(stored.datatype.is_raw());
    }

    #[test]
    fn test_non_raw_datatype_rejected_without_support() {
        let bucket = bucket();
        let mut connection = connection();
        let mut ctx = MutationCommandContext::new(
            &bucket,
            &mut connection,
            StoreOperation::Set,
            DocKey::default_collection(b"k".to_vec()),
            Vbid::new(0),
            CookieId::new(1),
            b"v".to_vec(),
            0,
            0,
            0,
            Datatype::JSON,
        );
        assert_eq!(ctx.step(), Status::Einval);
    }

    #[test]
    fn test_mutation_seqno_extras() {
        let bucket = bucket();
        let mut connection = connection();
        connection.features.mutation_seqno = true;
        let (status, cas) = run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v", 0);
        assert_eq!(status, Status::Success);

        let response = connection.take_response().unwrap();
        assert_eq!(response.cas, cas);
        assert_eq!(response.extras.len(), 16);
        let uuid = u64::from_be_bytes(response.extras[..8].try_into().unwrap());
        let seqno = u64::from_be_bytes(response.extras[8..].try_into().unwrap());
        assert_eq!(Some(uuid), bucket.vbucket_uuid(Vbid::new(0)));
        assert_eq!(seqno, 1);
    }

    #[test]
    fn test_noreply_skips_response() {
        let bucket = bucket();
        let mut connection = connection();
        connection.noreply = true;
        let (status, _) = run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v", 0);
        assert_eq!(status, Status::Success);
        assert!(connection.response().is_none());
        assert_eq!(connection.state(), ConnectionState::NewCmd);
    }

    #[test]
    fn test_stats_charged_per_outcome() {
        let bucket = bucket();
        let mut connection = connection();

        run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v", 0);
        assert_eq!(connection.stats().cmd_set.load(Ordering::Relaxed), 1);

        // Successful CAS counts a hit.
        let cas = bucket
            .get(
                &DocKey::default_collection(b"k".to_vec()),
                Vbid::new(0),
                CookieId::new(1),
                driftkv_kv::GetOptions::default(),
            )
            .item
            .unwrap()
            .cas;
        run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v2", cas);
        assert_eq!(connection.stats().cas_hits.load(Ordering::Relaxed), 1);

        // Bad CAS counts badval.
        run(&bucket, &mut connection, StoreOperation::Set, b"k", b"v3", cas);
        assert_eq!(connection.stats().cas_badval.load(Ordering::Relaxed), 1);

        // CAS on a missing key counts a miss.
        run(&bucket, &mut connection, StoreOperation::Set, b"absent", b"v", 999);
        assert_eq!(connection.stats().cas_misses.load(Ordering::Relaxed), 1);
    }
}
