//! proptest strategies for DriftKV types.

#![allow(clippy::expect_used)]

use driftkv_types::key::DocKey;
use proptest::prelude::*;

/// Strategy for collection names: short, separator-free identifiers.
pub fn collection_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,29}".prop_map(|s| s)
}

/// Strategy for user key bytes (may contain anything, including the
/// separator).
pub fn user_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..64)
}

/// Strategy for default-collection keys.
pub fn default_collection_key() -> impl Strategy<Value = DocKey> {
    user_key().prop_map(DocKey::default_collection)
}

/// Strategy for named-collection keys joined with the default separator.
pub fn collection_key() -> impl Strategy<Value = DocKey> {
    (collection_name(), user_key()).prop_map(|(name, user)| {
        let mut bytes = name.into_bytes();
        bytes.extend_from_slice(b"::");
        bytes.extend_from_slice(&user);
        DocKey::collection(bytes)
    })
}

/// Strategy for collection uids as hexadecimal strings.
pub fn uid_hex() -> impl Strategy<Value = String> {
    (0u64..=u64::MAX).prop_map(|uid| format!("{uid:x}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn collection_keys_split_back_to_their_name(key in collection_key()) {
            let (name, _) = key.split_collection("::").expect("built with separator");
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains(&b':'));
        }

        #[test]
        fn default_keys_resolve_to_default_collection(key in default_collection_key()) {
            prop_assert_eq!(key.collection_name("::"), Some(&b"$default"[..]));
        }

        #[test]
        fn uid_hex_parses(uid in uid_hex()) {
            prop_assert!(u64::from_str_radix(&uid, 16).is_ok());
        }
    }
}
