//! Engine status codes surfaced to protocol workers.

use crate::types::StoreOperation;

/// Result of an engine operation as seen by a protocol worker.
///
/// These are protocol-level outcomes, not Rust errors: most of them map
/// directly onto a binary-protocol response status. [`Status::WouldBlock`]
/// is the exception — it parks the command context and is never sent to a
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation completed.
    Success,
    /// The key does not exist.
    KeyNoent,
    /// The key exists (or a CAS comparison failed).
    KeyExists,
    /// A conditional store was not performed.
    NotStored,
    /// The request was malformed.
    Einval,
    /// The partition is not in a state that accepts the operation.
    NotMyVbucket,
    /// The opcode is recognised but unavailable on this bucket.
    NotSupported,
    /// The memory quota is exhausted.
    Enomem,
    /// Transient failure; the client should retry.
    TmpFail,
    /// Internal failure.
    Failed,
    /// The operation needs background work; the context is parked.
    WouldBlock,
    /// The extended-attribute section failed structural validation.
    XattrEinval,
}

impl Status {
    /// Returns true for [`Status::Success`].
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Remaps [`Status::NotStored`] per the requesting opcode.
    ///
    /// ADD reports `KeyExists` (the key was already there) and REPLACE
    /// reports `KeyNoent` (there was nothing to replace). Every other
    /// combination passes through unchanged.
    #[must_use]
    pub fn remap_not_stored(self, operation: StoreOperation) -> Self {
        if self != Status::NotStored {
            return self;
        }
        match operation {
            StoreOperation::Add => Status::KeyExists,
            StoreOperation::Replace => Status::KeyNoent,
            _ => self,
        }
    }

    /// Converts quota exhaustion into a retryable failure.
    ///
    /// Applied at the engine boundary once the worker knows a pager run
    /// has already been triggered for the memory condition.
    #[must_use]
    pub fn remap_enomem_to_tmpfail(self) -> Self {
        if self == Status::Enomem { Status::TmpFail } else { self }
    }

    /// Wire response status for this outcome, if it has one.
    ///
    /// Returns `None` for [`Status::WouldBlock`], which must never be
    /// serialised into a response.
    pub fn response_code(self) -> Option<u16> {
        let code = match self {
            Status::Success => 0x0000,
            Status::KeyNoent => 0x0001,
            Status::KeyExists => 0x0002,
            Status::Einval => 0x0004,
            Status::NotStored => 0x0005,
            Status::NotMyVbucket => 0x0007,
            Status::XattrEinval => 0x0025,
            Status::Enomem => 0x0082,
            Status::NotSupported => 0x0083,
            Status::Failed => 0x0084,
            Status::TmpFail => 0x0086,
            Status::WouldBlock => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_not_stored_for_add() {
        assert_eq!(
            Status::NotStored.remap_not_stored(StoreOperation::Add),
            Status::KeyExists
        );
    }

    #[test]
    fn test_remap_not_stored_for_replace() {
        assert_eq!(
            Status::NotStored.remap_not_stored(StoreOperation::Replace),
            Status::KeyNoent
        );
    }

    #[test]
    fn test_remap_not_stored_passthrough() {
        assert_eq!(
            Status::NotStored.remap_not_stored(StoreOperation::Set),
            Status::NotStored
        );
        assert_eq!(
            Status::Success.remap_not_stored(StoreOperation::Add),
            Status::Success
        );
    }

    #[test]
    fn test_enomem_remap() {
        assert_eq!(Status::Enomem.remap_enomem_to_tmpfail(), Status::TmpFail);
        assert_eq!(Status::KeyNoent.remap_enomem_to_tmpfail(), Status::KeyNoent);
    }

    #[test]
    fn test_would_block_has_no_wire_code() {
        assert!(Status::WouldBlock.response_code().is_none());
        assert_eq!(Status::Success.response_code(), Some(0));
        assert_eq!(Status::TmpFail.response_code(), Some(0x0086));
    }
}
