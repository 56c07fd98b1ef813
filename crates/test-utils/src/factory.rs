//! Engine item factories.

#![allow(clippy::expect_used)]

use driftkv_kv::Item;
use driftkv_types::datatype::Datatype;
use driftkv_types::key::DocKey;
use driftkv_types::Vbid;

/// Builds a default-collection item with no expiry.
pub fn make_item(vbid: u16, key: &[u8], value: &[u8]) -> Item {
    make_item_with_expiry(vbid, key, value, 0)
}

/// Builds a default-collection item with an absolute expiry time.
pub fn make_item_with_expiry(vbid: u16, key: &[u8], value: &[u8], exptime: u32) -> Item {
    Item::new(
        DocKey::default_collection(key.to_vec()),
        Vbid::new(vbid),
        value.to_vec(),
        0,
        exptime,
        Datatype::RAW,
    )
}
