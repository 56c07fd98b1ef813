//! The protocol datatype bitset.
//!
//! A document's datatype is a single byte carrying up to three independent
//! bits: JSON, snappy-compressed, and xattr-prefixed. Raw is the absence of
//! all bits. Clients must advertise support for snappy and xattr via HELLO
//! before the server will send them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Datatype bitset attached to every stored document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datatype(u8);

impl Datatype {
    /// No bits set; an opaque byte payload.
    pub const RAW: Datatype = Datatype(0);
    /// The payload is valid JSON.
    pub const JSON: Datatype = Datatype(0x01);
    /// The payload is snappy-compressed.
    pub const SNAPPY: Datatype = Datatype(0x02);
    /// The payload starts with an extended-attribute section.
    pub const XATTR: Datatype = Datatype(0x04);

    /// All bits that are defined by the protocol.
    const VALID_MASK: u8 = 0x07;

    /// Creates a datatype from a raw protocol byte without validation.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw protocol byte.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// True when only defined bits are set.
    pub const fn is_valid(self) -> bool {
        self.0 & !Self::VALID_MASK == 0
    }

    /// True when no bits are set.
    pub const fn is_raw(self) -> bool {
        self.0 == 0
    }

    /// True when the JSON bit is set.
    pub const fn is_json(self) -> bool {
        self.0 & Self::JSON.0 != 0
    }

    /// True when the snappy bit is set.
    pub const fn is_snappy(self) -> bool {
        self.0 & Self::SNAPPY.0 != 0
    }

    /// True when the xattr bit is set.
    pub const fn is_xattr(self) -> bool {
        self.0 & Self::XATTR.0 != 0
    }

    /// Returns a copy with the given bits added.
    #[must_use]
    pub const fn with(self, other: Datatype) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns a copy with the xattr bit cleared.
    #[must_use]
    pub const fn without_xattr(self) -> Self {
        Self(self.0 & !Self::XATTR.0)
    }

    /// Returns a copy with the snappy bit cleared.
    #[must_use]
    pub const fn without_snappy(self) -> Self {
        Self(self.0 & !Self::SNAPPY.0)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_raw() {
            return f.write_str("raw");
        }
        let mut first = true;
        for (bit, name) in [
            (Self::JSON, "json"),
            (Self::SNAPPY, "snappy"),
            (Self::XATTR, "xattr"),
        ] {
            if self.0 & bit.0 != 0 {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_is_valid() {
        assert!(Datatype::RAW.is_valid());
        assert!(Datatype::RAW.is_raw());
    }

    #[test]
    fn test_combinations_are_valid() {
        assert!(Datatype::JSON.is_valid());
        assert!(Datatype::SNAPPY.with(Datatype::JSON).is_valid());
        assert!(Datatype::XATTR.with(Datatype::SNAPPY).with(Datatype::JSON).is_valid());
    }

    #[test]
    fn test_unknown_bits_are_invalid() {
        assert!(!Datatype::from_raw(0x08).is_valid());
        assert!(!Datatype::from_raw(0xF0).is_valid());
        assert!(!Datatype::from_raw(0x80).with(Datatype::JSON).is_valid());
    }

    #[test]
    fn test_strip_xattr() {
        let dt = Datatype::XATTR.with(Datatype::JSON);
        assert!(dt.is_xattr());
        let stripped = dt.without_xattr();
        assert!(!stripped.is_xattr());
        assert!(stripped.is_json());
    }

    #[test]
    fn test_display() {
        assert_eq!(Datatype::RAW.to_string(), "raw");
        assert_eq!(Datatype::SNAPPY.with(Datatype::JSON).to_string(), "json,snappy");
    }
}
