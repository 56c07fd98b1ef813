//! Per-opcode structural request validation.
//!
//! Each validator is a pure predicate over the decoded header and
//! payload: magic, datatype bits, extras/key/body lengths and CAS
//! presence per the opcode's schema. DCP opcodes additionally require the
//! attached bucket's engine to expose the matching hook, and reject
//! unknown flag bits outright.

use driftkv_types::Status;
use tracing::debug;

use crate::features::ClientFeatures;
use crate::header::{Opcode, Request, MAGIC_REQUEST};
use crate::xattr::validate_xattr_blob;

/// Maximum IOCTL key length.
pub const IOCTL_KEY_MAX: usize = 128;

/// Maximum IOCTL value length.
pub const IOCTL_VAL_MAX: usize = 128;

/// Maximum bucket name length.
pub const MAX_BUCKET_NAME_LENGTH: usize = 100;

/// Maximum select-bucket key length.
pub const SELECT_BUCKET_KEY_MAX: usize = 1023;

/// DCP open flag: producer stream.
pub const DCP_OPEN_PRODUCER: u32 = 0x01;
/// DCP open flag: notifier stream.
pub const DCP_OPEN_NOTIFIER: u32 = 0x02;
/// DCP open flag: include extended attributes.
pub const DCP_OPEN_INCLUDE_XATTRS: u32 = 0x04;
/// DCP open flag: no values.
pub const DCP_OPEN_NO_VALUE: u32 = 0x08;
/// DCP open flag: collection-aware stream.
pub const DCP_OPEN_COLLECTIONS: u32 = 0x10;

/// DCP add-stream flag: takeover.
pub const DCP_ADD_STREAM_FLAG_TAKEOVER: u32 = 0x01;
/// DCP add-stream flag: disk only.
pub const DCP_ADD_STREAM_FLAG_DISKONLY: u32 = 0x02;
/// DCP add-stream flag: latest seqno.
pub const DCP_ADD_STREAM_FLAG_LATEST: u32 = 0x04;
/// DCP add-stream flag: rejected here; belongs on DCP open.
pub const DCP_ADD_STREAM_FLAG_NO_VALUE: u32 = 0x08;
/// DCP add-stream flag: active partitions only.
pub const DCP_ADD_STREAM_ACTIVE_VB_ONLY: u32 = 0x10;

/// DCP hooks the attached bucket's engine implements.
///
/// A missing hook turns the corresponding opcode into `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct DcpHooks {
    pub open: bool,
    pub add_stream: bool,
    pub close_stream: bool,
    pub stream_req: bool,
    pub get_failover_log: bool,
    pub stream_end: bool,
    pub snapshot_marker: bool,
    pub mutation: bool,
    pub deletion: bool,
    pub expiration: bool,
    pub flush: bool,
    pub system_event: bool,
}

impl DcpHooks {
    /// Every hook present.
    pub fn all() -> Self {
        Self {
            open: true,
            add_stream: true,
            close_stream: true,
            stream_req: true,
            get_failover_log: true,
            stream_end: true,
            snapshot_marker: true,
            mutation: true,
            deletion: true,
            expiration: true,
            flush: true,
            system_event: true,
        }
    }

    /// No hook present (non-DCP engine).
    pub fn none() -> Self {
        Self {
            open: false,
            add_stream: false,
            close_stream: false,
            stream_req: false,
            get_failover_log: false,
            stream_end: false,
            snapshot_marker: false,
            mutation: false,
            deletion: false,
            expiration: false,
            flush: false,
            system_event: false,
        }
    }
}

/// Connection-level inputs a validator consults.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorContext<'a> {
    /// Negotiated client capabilities.
    pub features: &'a ClientFeatures,
    /// DCP hooks of the attached bucket's engine.
    pub dcp: &'a DcpHooks,
}

impl ValidatorContext<'_> {
    fn may_accept_xattr(&self, request: &Request) -> bool {
        if request.header.datatype.is_xattr() { self.features.xattr } else { true }
    }
}

/// Validates a request against its opcode's schema.
///
/// Returns `Success` when the packet is structurally sound, `Einval` /
/// `XattrEinval` on malformed packets, and `NotSupported` for DCP
/// opcodes the engine cannot serve. Unknown opcodes report `NotSupported`.
pub fn validate_request(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    if request.header.magic != MAGIC_REQUEST {
        return Status::Einval;
    }
    let Some(opcode) = request.header.opcode() else {
        return Status::NotSupported;
    };
    match opcode {
        Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => get_validator(request),
        Opcode::Set
        | Opcode::SetQ
        | Opcode::Add
        | Opcode::AddQ
        | Opcode::Replace
        | Opcode::ReplaceQ => mutation_validator(request, opcode, ctx),
        Opcode::Append | Opcode::Prepend => concat_validator(request, ctx),
        Opcode::Delete | Opcode::DeleteQ => delete_validator(request),
        Opcode::Hello => hello_validator(request),
        Opcode::CreateBucket => create_bucket_validator(request),
        Opcode::SelectBucket => select_bucket_validator(request),
        Opcode::IoctlGet => ioctl_get_validator(request),
        Opcode::IoctlSet => ioctl_set_validator(request),
        Opcode::DcpOpen => dcp_open_validator(request, ctx),
        Opcode::DcpAddStream => dcp_add_stream_validator(request, ctx),
        Opcode::DcpCloseStream => {
            dcp_no_payload_validator(request, ctx.dcp.close_stream)
        }
        Opcode::DcpGetFailoverLog => {
            dcp_no_payload_validator(request, ctx.dcp.get_failover_log)
        }
        Opcode::DcpStreamReq => dcp_stream_req_validator(request, ctx),
        Opcode::DcpStreamEnd => dcp_fixed_extras_validator(request, 4, ctx.dcp.stream_end),
        Opcode::DcpSnapshotMarker => {
            dcp_fixed_extras_validator(request, 20, ctx.dcp.snapshot_marker)
        }
        Opcode::DcpMutation => dcp_mutation_validator(request, ctx),
        Opcode::DcpDeletion => dcp_deletion_validator(request, ctx),
        Opcode::DcpExpiration => dcp_expiration_validator(request, ctx),
        Opcode::DcpFlush => dcp_no_payload_validator(request, ctx.dcp.flush),
        Opcode::DcpSystemEvent => dcp_system_event_validator(request, ctx),
    }
}

fn get_validator(request: &Request) -> Status {
    let h = &request.header;
    if h.extras_len != 0
        || h.key_len == 0
        || u32::from(h.key_len) != h.body_len
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn mutation_validator(request: &Request, opcode: Opcode, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    // Extras carry flags and expiration.
    if h.extras_len != 8 || h.key_len == 0 || !h.datatype.is_valid() {
        return Status::Einval;
    }
    if !ctx.may_accept_xattr(request) {
        return Status::Einval;
    }
    if h.datatype.is_xattr() && !validate_xattr_blob(request.value()) {
        return Status::XattrEinval;
    }
    // ADD creates; a CAS makes no sense there.
    if matches!(opcode, Opcode::Add | Opcode::AddQ) && h.cas != 0 {
        return Status::Einval;
    }
    Status::Success
}

fn concat_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    if h.extras_len != 0 || h.key_len == 0 || !h.datatype.is_valid() {
        return Status::Einval;
    }
    if !ctx.may_accept_xattr(request) {
        return Status::Einval;
    }
    Status::Success
}

fn delete_validator(request: &Request) -> Status {
    let h = &request.header;
    if h.extras_len != 0
        || h.key_len == 0
        || u32::from(h.key_len) != h.body_len
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn hello_validator(request: &Request) -> Status {
    let h = &request.header;
    let value_len = h.body_len - u32::from(h.key_len) - u32::from(h.extras_len);
    if h.extras_len != 0 || !h.datatype.is_raw() || value_len % 2 != 0 {
        return Status::Einval;
    }
    Status::Success
}

fn create_bucket_validator(request: &Request) -> Status {
    let h = &request.header;
    if h.extras_len != 0
        || h.key_len == 0
        || usize::from(h.key_len) > MAX_BUCKET_NAME_LENGTH
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn select_bucket_validator(request: &Request) -> Status {
    let h = &request.header;
    if h.extras_len != 0
        || h.key_len == 0
        || usize::from(h.key_len) > SELECT_BUCKET_KEY_MAX
        || u32::from(h.key_len) != h.body_len
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn ioctl_get_validator(request: &Request) -> Status {
    let h = &request.header;
    if h.extras_len != 0
        || h.key_len == 0
        || usize::from(h.key_len) > IOCTL_KEY_MAX
        || u32::from(h.key_len) != h.body_len
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn ioctl_set_validator(request: &Request) -> Status {
    let h = &request.header;
    let value_len = h.body_len as usize - usize::from(h.key_len);
    if h.extras_len != 0
        || h.key_len == 0
        || usize::from(h.key_len) > IOCTL_KEY_MAX
        || value_len > IOCTL_VAL_MAX
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    Status::Success
}

fn dcp_open_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    if h.extras_len != 8 || h.key_len == 0 || !h.datatype.is_raw() {
        return Status::Einval;
    }

    let flags = u32::from_be_bytes([
        request.extras()[0],
        request.extras()[1],
        request.extras()[2],
        request.extras()[3],
    ]);

    // A value is only meaningful for collection-aware opens.
    let value_len = h.body_len - u32::from(h.extras_len) - u32::from(h.key_len);
    if flags & DCP_OPEN_COLLECTIONS == 0 && value_len != 0 {
        return Status::Einval;
    }

    if !ctx.dcp.open {
        return Status::NotSupported;
    }

    let mask = DCP_OPEN_PRODUCER
        | DCP_OPEN_NOTIFIER
        | DCP_OPEN_INCLUDE_XATTRS
        | DCP_OPEN_NO_VALUE
        | DCP_OPEN_COLLECTIONS;
    if flags & !mask != 0 {
        debug!(flags, "client tried to open dcp stream with unknown flags");
        return Status::Einval;
    }
    // A notifier stream cannot combine with any other open mode.
    if flags & DCP_OPEN_NOTIFIER != 0 && flags & !DCP_OPEN_NOTIFIER != 0 {
        debug!(flags, "invalid flag combination for a dcp consumer");
        return Status::Einval;
    }

    Status::Success
}

fn dcp_add_stream_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    if h.extras_len != 4 || h.key_len != 0 || h.body_len != 4 || !h.datatype.is_raw() {
        return Status::Einval;
    }
    if !ctx.dcp.add_stream {
        return Status::NotSupported;
    }
    let flags = u32::from_be_bytes([
        request.extras()[0],
        request.extras()[1],
        request.extras()[2],
        request.extras()[3],
    ]);
    let mask = DCP_ADD_STREAM_FLAG_TAKEOVER
        | DCP_ADD_STREAM_FLAG_DISKONLY
        | DCP_ADD_STREAM_FLAG_LATEST
        | DCP_ADD_STREAM_ACTIVE_VB_ONLY;
    if flags & !mask != 0 {
        if flags & DCP_ADD_STREAM_FLAG_NO_VALUE != 0 {
            // NO_VALUE moved to DCP open.
            debug!(flags, "client tried to add stream with no-value flag");
        } else {
            debug!(flags, "client tried to add stream with unknown flags");
        }
        return Status::Einval;
    }
    Status::Success
}

fn dcp_no_payload_validator(request: &Request, hook: bool) -> Status {
    let h = &request.header;
    if h.extras_len != 0 || h.key_len != 0 || h.body_len != 0 || !h.datatype.is_raw() {
        return Status::Einval;
    }
    if !hook {
        return Status::NotSupported;
    }
    Status::Success
}

fn dcp_fixed_extras_validator(request: &Request, extras: u8, hook: bool) -> Status {
    let h = &request.header;
    if h.extras_len != extras
        || h.key_len != 0
        || h.body_len != u32::from(extras)
        || !h.datatype.is_raw()
    {
        return Status::Einval;
    }
    if !hook {
        return Status::NotSupported;
    }
    Status::Success
}

fn dcp_stream_req_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    // 5 seqno fields and 2 u32 fields.
    if h.extras_len != 48 || h.key_len != 0 || !h.datatype.is_raw() {
        return Status::Einval;
    }
    if !ctx.dcp.stream_req {
        return Status::NotSupported;
    }
    Status::Success
}

/// Extras length of a collection-aware vs legacy DCP mutation.
fn dcp_mutation_extras(collections: bool) -> u8 {
    if collections { 32 } else { 31 }
}

/// Extras length of a collection-aware vs legacy DCP deletion.
fn dcp_deletion_extras(collections: bool) -> u8 {
    if collections { 19 } else { 18 }
}

fn dcp_mutation_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    if h.key_len == 0
        || h.body_len == 0
        || u32::from(h.key_len) + u32::from(h.extras_len) > h.body_len
        || !h.datatype.is_valid()
        || !ctx.may_accept_xattr(request)
    {
        return Status::Einval;
    }
    if h.extras_len != dcp_mutation_extras(ctx.features.collections) {
        return Status::Einval;
    }
    if h.datatype.is_xattr() && !validate_xattr_blob(request.value()) {
        return Status::XattrEinval;
    }
    if !ctx.dcp.mutation {
        return Status::NotSupported;
    }
    Status::Success
}

fn dcp_deletion_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    if h.key_len == 0 {
        return Status::Einval;
    }
    // Raw, or xattr alone when advertised.
    let acceptable = h.datatype.is_raw()
        || (h.datatype == driftkv_types::datatype::Datatype::XATTR && ctx.features.xattr);
    if !acceptable {
        return Status::Einval;
    }
    if h.extras_len != dcp_deletion_extras(ctx.features.collections) {
        return Status::Einval;
    }
    if !ctx.dcp.deletion {
        return Status::NotSupported;
    }
    Status::Success
}

fn dcp_expiration_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    let value_len = h.body_len - u32::from(h.key_len) - u32::from(h.extras_len);
    if h.key_len == 0 || value_len != 0 || !h.datatype.is_raw() {
        return Status::Einval;
    }
    if h.extras_len != dcp_deletion_extras(ctx.features.collections) {
        return Status::Einval;
    }
    if !ctx.dcp.expiration {
        return Status::NotSupported;
    }
    Status::Success
}

fn dcp_system_event_validator(request: &Request, ctx: &ValidatorContext<'_>) -> Status {
    let h = &request.header;
    // Extras: by_seqno (8) + event code (4).
    if h.extras_len != 12 || u32::from(h.extras_len) + u32::from(h.key_len) > h.body_len {
        return Status::Einval;
    }
    let event = u32::from_be_bytes([
        request.extras()[8],
        request.extras()[9],
        request.extras()[10],
        request.extras()[11],
    ]);
    if event > 3 {
        return Status::Einval;
    }
    if !ctx.dcp.system_event {
        return Status::NotSupported;
    }
    Status::Success
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use driftkv_types::datatype::Datatype;

    use super::*;
    use crate::header::build_request;
    use crate::xattr::build_xattr_section;

    fn request(
        opcode: u8,
        datatype: Datatype,
        cas: u64,
        extras: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Request {
        Request::parse(build_request(opcode, 0, datatype, cas, extras, key, value))
            .expect("well-framed packet")
    }

    fn validate(request: &Request, features: ClientFeatures, dcp: DcpHooks) -> Status {
        validate_request(request, &ValidatorContext { features: &features, dcp: &dcp })
    }

    fn plain(request: &Request) -> Status {
        validate(request, ClientFeatures::default(), DcpHooks::all())
    }

    #[test]
    fn test_get_schema() {
        let ok = request(0x00, Datatype::RAW, 0, &[], b"key", b"");
        assert_eq!(plain(&ok), Status::Success);

        let no_key = request(0x00, Datatype::RAW, 0, &[], b"", b"");
        assert_eq!(plain(&no_key), Status::Einval);

        let with_value = request(0x00, Datatype::RAW, 0, &[], b"key", b"value");
        assert_eq!(plain(&with_value), Status::Einval);

        let with_extras = request(0x00, Datatype::RAW, 0, &[0; 4], b"key", b"");
        assert_eq!(plain(&with_extras), Status::Einval);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let mut packet = build_request(0x00, 0, Datatype::RAW, 0, &[], b"key", b"");
        packet[0] = 0x81;
        let request = Request::parse(packet).unwrap();
        assert_eq!(plain(&request), Status::Einval);
    }

    #[test]
    fn test_unknown_opcode_not_supported() {
        let packet = build_request(0x7e, 0, Datatype::RAW, 0, &[], b"", b"");
        let request = Request::parse(packet).unwrap();
        assert_eq!(plain(&request), Status::NotSupported);
    }

    #[test]
    fn test_set_schema() {
        let ok = request(0x01, Datatype::RAW, 0, &[0; 8], b"key", b"value");
        assert_eq!(plain(&ok), Status::Success);

        let bad_extras = request(0x01, Datatype::RAW, 0, &[0; 4], b"key", b"value");
        assert_eq!(plain(&bad_extras), Status::Einval);

        let bad_datatype = request(0x01, Datatype::from_raw(0x80), 0, &[0; 8], b"key", b"v");
        assert_eq!(plain(&bad_datatype), Status::Einval);
    }

    #[test]
    fn test_add_rejects_cas() {
        let with_cas = request(0x02, Datatype::RAW, 99, &[0; 8], b"key", b"value");
        assert_eq!(plain(&with_cas), Status::Einval);
        let without = request(0x02, Datatype::RAW, 0, &[0; 8], b"key", b"value");
        assert_eq!(plain(&without), Status::Success);
    }

    #[test]
    fn test_xattr_requires_advertisement() {
        let blob = build_xattr_section(&[("k", "v")], b"doc");
        let req = request(0x01, Datatype::XATTR, 0, &[0; 8], b"key", &blob);
        assert_eq!(plain(&req), Status::Einval);

        let mut features = ClientFeatures::default();
        features.xattr = true;
        assert_eq!(validate(&req, features, DcpHooks::all()), Status::Success);
    }

    #[test]
    fn test_invalid_xattr_blob() {
        let mut blob = build_xattr_section(&[("k", "v")], b"doc");
        blob.truncate(6);
        // Re-frame with the truncated value.
        let req = request(0x01, Datatype::XATTR, 0, &[0; 8], b"key", &blob);
        let mut features = ClientFeatures::default();
        features.xattr = true;
        assert_eq!(validate(&req, features, DcpHooks::all()), Status::XattrEinval);
    }

    #[test]
    fn test_delete_schema() {
        let ok = request(0x04, Datatype::RAW, 0, &[], b"key", b"");
        assert_eq!(plain(&ok), Status::Success);
        let with_value = request(0x04, Datatype::RAW, 0, &[], b"key", b"v");
        assert_eq!(plain(&with_value), Status::Einval);
    }

    #[test]
    fn test_hello_requires_even_value() {
        let ok = request(0x1f, Datatype::RAW, 0, &[], b"agent", &[0, 1, 0, 4]);
        assert_eq!(plain(&ok), Status::Success);
        let odd = request(0x1f, Datatype::RAW, 0, &[], b"agent", &[0, 1, 0]);
        assert_eq!(plain(&odd), Status::Einval);
    }

    #[test]
    fn test_select_bucket_length_bound() {
        let ok = request(0x89, Datatype::RAW, 0, &[], &[b'a'; 1023], b"");
        assert_eq!(plain(&ok), Status::Success);
        // Longer keys cannot be expressed: the key length field is u16,
        // so check the boundary just above the limit.
        let too_long = request(0x89, Datatype::RAW, 0, &[], &[b'a'; 1024], b"");
        assert_eq!(plain(&too_long), Status::Einval);
    }

    #[test]
    fn test_create_bucket_name_bound() {
        let ok = request(0x85, Datatype::RAW, 0, &[], &[b'b'; 100], b"config");
        assert_eq!(plain(&ok), Status::Success);
        let too_long = request(0x85, Datatype::RAW, 0, &[], &[b'b'; 101], b"config");
        assert_eq!(plain(&too_long), Status::Einval);
    }

    #[test]
    fn test_ioctl_bounds() {
        let ok = request(0xc5, Datatype::RAW, 0, &[], &[b'k'; 128], b"");
        assert_eq!(plain(&ok), Status::Success);
        let key_too_long = request(0xc5, Datatype::RAW, 0, &[], &[b'k'; 129], b"");
        assert_eq!(plain(&key_too_long), Status::Einval);

        let set_ok = request(0xc6, Datatype::RAW, 0, &[], b"trace.config", &[b'v'; 128]);
        assert_eq!(plain(&set_ok), Status::Success);
        let val_too_long = request(0xc6, Datatype::RAW, 0, &[], b"trace.config", &[b'v'; 129]);
        assert_eq!(plain(&val_too_long), Status::Einval);
    }

    #[test]
    fn test_dcp_open_schema_and_flags() {
        let flags = DCP_OPEN_PRODUCER.to_be_bytes();
        let mut extras = [0u8; 8];
        extras[..4].copy_from_slice(&flags);
        let ok = request(0x50, Datatype::RAW, 0, &extras, b"name", b"");
        assert_eq!(plain(&ok), Status::Success);

        // Unknown flag bit.
        let mut bad = [0u8; 8];
        bad[..4].copy_from_slice(&0x8000_0000u32.to_be_bytes());
        let unknown = request(0x50, Datatype::RAW, 0, &bad, b"name", b"");
        assert_eq!(plain(&unknown), Status::Einval);

        // Notifier combined with producer.
        let mut combo = [0u8; 8];
        combo[..4]
            .copy_from_slice(&(DCP_OPEN_NOTIFIER | DCP_OPEN_PRODUCER).to_be_bytes());
        let invalid = request(0x50, Datatype::RAW, 0, &combo, b"name", b"");
        assert_eq!(plain(&invalid), Status::Einval);

        // A value requires the collections flag.
        let with_value = request(0x50, Datatype::RAW, 0, &extras, b"name", b"manifest");
        assert_eq!(plain(&with_value), Status::Einval);
        let mut coll = [0u8; 8];
        coll[..4].copy_from_slice(&DCP_OPEN_COLLECTIONS.to_be_bytes());
        let coll_value = request(0x50, Datatype::RAW, 0, &coll, b"name", b"manifest");
        assert_eq!(plain(&coll_value), Status::Success);
    }

    #[test]
    fn test_dcp_without_engine_hooks() {
        let flags = DCP_OPEN_PRODUCER.to_be_bytes();
        let mut extras = [0u8; 8];
        extras[..4].copy_from_slice(&flags);
        let open = request(0x50, Datatype::RAW, 0, &extras, b"name", b"");
        assert_eq!(
            validate(&open, ClientFeatures::default(), DcpHooks::none()),
            Status::NotSupported
        );

        let close = request(0x52, Datatype::RAW, 0, &[], b"", b"");
        assert_eq!(
            validate(&close, ClientFeatures::default(), DcpHooks::none()),
            Status::NotSupported
        );
    }

    #[test]
    fn test_dcp_add_stream_flags() {
        let ok = request(
            0x51,
            Datatype::RAW,
            0,
            &DCP_ADD_STREAM_FLAG_TAKEOVER.to_be_bytes(),
            b"",
            b"",
        );
        assert_eq!(plain(&ok), Status::Success);

        let no_value = request(
            0x51,
            Datatype::RAW,
            0,
            &DCP_ADD_STREAM_FLAG_NO_VALUE.to_be_bytes(),
            b"",
            b"",
        );
        assert_eq!(plain(&no_value), Status::Einval);
    }

    #[test]
    fn test_dcp_stream_req_extras() {
        let ok = request(0x53, Datatype::RAW, 0, &[0; 48], b"", b"");
        assert_eq!(plain(&ok), Status::Success);
        let short = request(0x53, Datatype::RAW, 0, &[0; 40], b"", b"");
        assert_eq!(plain(&short), Status::Einval);
    }

    #[test]
    fn test_dcp_snapshot_marker_extras() {
        let ok = request(0x56, Datatype::RAW, 0, &[0; 20], b"", b"");
        assert_eq!(plain(&ok), Status::Success);
        let short = request(0x56, Datatype::RAW, 0, &[0; 16], b"", b"");
        assert_eq!(plain(&short), Status::Einval);
    }

    #[test]
    fn test_dcp_mutation_extras_depend_on_collections() {
        let legacy = request(0x57, Datatype::RAW, 0, &[0; 31], b"key", b"value");
        assert_eq!(plain(&legacy), Status::Success);

        let mut features = ClientFeatures::default();
        features.collections = true;
        assert_eq!(validate(&legacy, features, DcpHooks::all()), Status::Einval);
        let aware = request(0x57, Datatype::RAW, 0, &[0; 32], b"key", b"value");
        assert_eq!(validate(&aware, features, DcpHooks::all()), Status::Success);
    }

    #[test]
    fn test_dcp_deletion_datatype_rules() {
        let raw = request(0x58, Datatype::RAW, 0, &[0; 18], b"key", b"");
        assert_eq!(plain(&raw), Status::Success);

        let json = request(0x58, Datatype::JSON, 0, &[0; 18], b"key", b"");
        assert_eq!(plain(&json), Status::Einval);

        let xattr_blob = build_xattr_section(&[("m", "1")], b"");
        let xattr = request(0x58, Datatype::XATTR, 0, &[0; 18], b"key", &xattr_blob);
        assert_eq!(plain(&xattr), Status::Einval);
        let mut features = ClientFeatures::default();
        features.xattr = true;
        assert_eq!(validate(&xattr, features, DcpHooks::all()), Status::Success);
    }

    #[test]
    fn test_dcp_expiration_no_value() {
        let ok = request(0x59, Datatype::RAW, 0, &[0; 18], b"key", b"");
        assert_eq!(plain(&ok), Status::Success);
        let with_value = request(0x59, Datatype::RAW, 0, &[0; 18], b"key", b"junk");
        assert_eq!(plain(&with_value), Status::Einval);
    }

    #[test]
    fn test_dcp_system_event_code() {
        let mut extras = [0u8; 12];
        extras[8..].copy_from_slice(&1u32.to_be_bytes());
        let ok = request(0x5f, Datatype::RAW, 0, &extras, b"key", b"payload");
        assert_eq!(plain(&ok), Status::Success);

        let mut bad = [0u8; 12];
        bad[8..].copy_from_slice(&9u32.to_be_bytes());
        let unknown = request(0x5f, Datatype::RAW, 0, &bad, b"key", b"payload");
        assert_eq!(plain(&unknown), Status::Einval);
    }
}
