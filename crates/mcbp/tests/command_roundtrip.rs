//! Wire-level command round-trips: validate a packet, run its context,
//! inspect the response.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use driftkv_kv::{Bucket, IoNotifier, KvStore, MemoryKvStore, NullNotifier};
use driftkv_mcbp::context::{GetCommandContext, MutationCommandContext};
use driftkv_mcbp::header::{build_request, Opcode, Request};
use driftkv_mcbp::validators::{validate_request, DcpHooks, ValidatorContext};
use driftkv_mcbp::{Connection, IdentityInflater, McbpStats};
use driftkv_test_utils::make_item;
use driftkv_types::clock::WallClock;
use driftkv_types::config::{KvConfig, KvStoreConfig};
use driftkv_types::datatype::Datatype;
use driftkv_types::key::DocKey;
use driftkv_types::{CookieId, EvictionPolicy, Status, StoreOperation, VbState, Vbid};

fn build_bucket() -> Bucket {
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

fn validate(request: &Request, connection: &Connection) -> Status {
    let hooks = DcpHooks::all();
    validate_request(
        request,
        &ValidatorContext { features: &connection.features, dcp: &hooks },
    )
}

/// Runs one mutation packet through validation and its context.
fn drive_mutation(bucket: &Bucket, connection: &mut Connection, packet: Vec<u8>) -> (Status, u64) {
    let request = Request::parse(packet).expect("well-framed packet");
    assert_eq!(validate(&request, connection), Status::Success);

    let opcode = request.header.opcode().unwrap();
    let operation = match opcode {
        Opcode::Set | Opcode::SetQ => StoreOperation::Set,
        Opcode::Add | Opcode::AddQ => StoreOperation::Add,
        Opcode::Replace | Opcode::ReplaceQ => StoreOperation::Replace,
        Opcode::Append => StoreOperation::Append,
        Opcode::Prepend => StoreOperation::Prepend,
        other => panic!("not a mutation opcode: {other:?}"),
    };
    let flags = u32::from_be_bytes(request.extras()[..4].try_into().unwrap());
    let expiration = u32::from_be_bytes(request.extras()[4..8].try_into().unwrap());

    let mut ctx = MutationCommandContext::new(
        bucket,
        connection,
        operation,
        DocKey::default_collection(request.key().to_vec()),
        Vbid::new(request.header.vbucket),
        CookieId::new(1),
        request.value().to_vec(),
        flags,
        expiration,
        request.header.cas,
        request.header.datatype,
    );
    let status = ctx.step();
    let cas = connection.cas();
    (status, cas)
}

fn set_packet(key: &[u8], value: &[u8], cas: u64) -> Vec<u8> {
    build_request(0x01, 0, Datatype::RAW, cas, &[0; 8], key, value)
}

fn add_packet(key: &[u8], value: &[u8]) -> Vec<u8> {
    build_request(0x02, 0, Datatype::RAW, 0, &[0; 8], key, value)
}

// SET then ADD then CAS-replays: the conditional-store round-trip as a
// client observes it on the wire.
#[test]
fn set_add_cas_roundtrip() {
    let bucket = build_bucket();
    let mut connection = Connection::new(Arc::new(McbpStats::new()));

    let (status, cas1) = drive_mutation(&bucket, &mut connection, set_packet(b"k", b"v", 0));
    assert_eq!(status, Status::Success);
    assert_ne!(cas1, 0);

    let (status, _) = drive_mutation(&bucket, &mut connection, add_packet(b"k", b"v2"));
    assert_eq!(status, Status::KeyExists);

    let (status, cas2) = drive_mutation(&bucket, &mut connection, set_packet(b"k", b"v2", cas1));
    assert_eq!(status, Status::Success);
    assert!(cas2 > cas1);

    let (status, _) = drive_mutation(&bucket, &mut connection, set_packet(b"k", b"v3", cas1));
    assert_eq!(status, Status::KeyExists);
}

#[test]
fn get_roundtrip() {
    let bucket = build_bucket();
    let mut item = make_item(0, b"k", b"wire-value");
    item.flags = 0xabcd;
    assert_eq!(
        bucket.store(&item, StoreOperation::Set, CookieId::new(1)).status,
        Status::Success
    );

    let mut connection = Connection::new(Arc::new(McbpStats::new()));
    let packet = build_request(0x00, 0, Datatype::RAW, 0, &[], b"k", b"");
    let request = Request::parse(packet).unwrap();
    assert_eq!(validate(&request, &connection), Status::Success);

    let inflater = IdentityInflater;
    let mut ctx = GetCommandContext::new(
        &bucket,
        &mut connection,
        &inflater,
        DocKey::default_collection(request.key().to_vec()),
        Vbid::new(request.header.vbucket),
        CookieId::new(1),
        false,
        false,
    );
    assert_eq!(ctx.step(), Status::Success);

    let response = connection.take_response().unwrap();
    assert_eq!(response.status, 0);
    assert_eq!(response.extras, 0xabcdu32.to_be_bytes().to_vec());
    assert_eq!(response.value, b"wire-value");
}

#[test]
fn malformed_packet_never_reaches_the_engine() {
    let connection = Connection::new(Arc::new(McbpStats::new()));
    // SET without its flags/expiry extras.
    let packet = build_request(0x01, 0, Datatype::RAW, 0, &[], b"k", b"v");
    let request = Request::parse(packet).unwrap();
    assert_eq!(validate(&request, &connection), Status::Einval);
}
