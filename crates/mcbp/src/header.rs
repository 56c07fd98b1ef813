//! Memcached binary protocol framing.
//!
//! Every packet starts with a 24-byte fixed header; the payload is
//! `extras || key || value`. Multi-byte integer fields are network byte
//! order.

use driftkv_types::datatype::Datatype;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 24;

/// Magic byte of a request packet.
pub const MAGIC_REQUEST: u8 = 0x80;

/// Magic byte of a response packet.
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Opcodes the front-end recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    GetQ,
    GetK,
    GetKQ,
    Append,
    Prepend,
    SetQ,
    AddQ,
    ReplaceQ,
    DeleteQ,
    Hello,
    CreateBucket,
    SelectBucket,
    IoctlGet,
    IoctlSet,
    DcpOpen,
    DcpAddStream,
    DcpCloseStream,
    DcpStreamReq,
    DcpGetFailoverLog,
    DcpStreamEnd,
    DcpSnapshotMarker,
    DcpMutation,
    DcpDeletion,
    DcpExpiration,
    DcpFlush,
    DcpSystemEvent,
}

impl Opcode {
    /// Decodes a wire opcode.
    pub fn from_u8(raw: u8) -> Option<Self> {
        let opcode = match raw {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x09 => Opcode::GetQ,
            0x0c => Opcode::GetK,
            0x0d => Opcode::GetKQ,
            0x0e => Opcode::Append,
            0x0f => Opcode::Prepend,
            0x11 => Opcode::SetQ,
            0x12 => Opcode::AddQ,
            0x13 => Opcode::ReplaceQ,
            0x14 => Opcode::DeleteQ,
            0x1f => Opcode::Hello,
            0x50 => Opcode::DcpOpen,
            0x51 => Opcode::DcpAddStream,
            0x52 => Opcode::DcpCloseStream,
            0x53 => Opcode::DcpStreamReq,
            0x54 => Opcode::DcpGetFailoverLog,
            0x55 => Opcode::DcpStreamEnd,
            0x56 => Opcode::DcpSnapshotMarker,
            0x57 => Opcode::DcpMutation,
            0x58 => Opcode::DcpDeletion,
            0x59 => Opcode::DcpExpiration,
            0x5a => Opcode::DcpFlush,
            0x5f => Opcode::DcpSystemEvent,
            0x85 => Opcode::CreateBucket,
            0x89 => Opcode::SelectBucket,
            0xc5 => Opcode::IoctlGet,
            0xc6 => Opcode::IoctlSet,
            _ => return None,
        };
        Some(opcode)
    }

    /// True for the quiet variants that suppress miss responses.
    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Opcode::GetQ
                | Opcode::GetKQ
                | Opcode::SetQ
                | Opcode::AddQ
                | Opcode::ReplaceQ
                | Opcode::DeleteQ
        )
    }

    /// True for the variants that echo the key in the response.
    pub fn returns_key(self) -> bool {
        matches!(self, Opcode::GetK | Opcode::GetKQ)
    }
}

/// Decoded 24-byte request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Magic byte (must be [`MAGIC_REQUEST`]).
    pub magic: u8,
    /// Raw opcode byte.
    pub opcode: u8,
    /// Key length.
    pub key_len: u16,
    /// Extras length.
    pub extras_len: u8,
    /// Datatype bitset.
    pub datatype: Datatype,
    /// Partition id (request) or status (response).
    pub vbucket: u16,
    /// Total body length (extras + key + value).
    pub body_len: u32,
    /// Client-chosen opaque, echoed in the response.
    pub opaque: u32,
    /// Compare-and-swap token.
    pub cas: u64,
}

impl RequestHeader {
    /// Parses the fixed header from the start of a packet.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            magic: packet[0],
            opcode: packet[1],
            key_len: u16::from_be_bytes([packet[2], packet[3]]),
            extras_len: packet[4],
            datatype: Datatype::from_raw(packet[5]),
            vbucket: u16::from_be_bytes([packet[6], packet[7]]),
            body_len: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
            opaque: u32::from_be_bytes([packet[12], packet[13], packet[14], packet[15]]),
            cas: u64::from_be_bytes([
                packet[16], packet[17], packet[18], packet[19], packet[20], packet[21],
                packet[22], packet[23],
            ]),
        })
    }

    /// Serialises the header.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.magic;
        out[1] = self.opcode;
        out[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        out[4] = self.extras_len;
        out[5] = self.datatype.raw();
        out[6..8].copy_from_slice(&self.vbucket.to_be_bytes());
        out[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        out[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        out[16..24].copy_from_slice(&self.cas.to_be_bytes());
        out
    }

    /// Decoded opcode.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Value length, when the header is internally consistent.
    pub fn value_len(&self) -> Option<u32> {
        let fixed = u32::from(self.key_len) + u32::from(self.extras_len);
        self.body_len.checked_sub(fixed)
    }
}

/// One decoded request packet.
#[derive(Debug, Clone)]
pub struct Request {
    /// The parsed header.
    pub header: RequestHeader,
    /// The full packet bytes, header included.
    pub packet: Vec<u8>,
}

impl Request {
    /// Parses a packet, checking only framing-level consistency.
    pub fn parse(packet: Vec<u8>) -> Option<Self> {
        let header = RequestHeader::parse(&packet)?;
        let total = HEADER_LEN.checked_add(header.body_len as usize)?;
        if packet.len() != total || header.value_len().is_none() {
            return None;
        }
        Some(Self { header, packet })
    }

    /// The extras section.
    pub fn extras(&self) -> &[u8] {
        let start = HEADER_LEN;
        &self.packet[start..start + usize::from(self.header.extras_len)]
    }

    /// The key section.
    pub fn key(&self) -> &[u8] {
        let start = HEADER_LEN + usize::from(self.header.extras_len);
        &self.packet[start..start + usize::from(self.header.key_len)]
    }

    /// The value section.
    pub fn value(&self) -> &[u8] {
        let start = HEADER_LEN
            + usize::from(self.header.extras_len)
            + usize::from(self.header.key_len);
        &self.packet[start..]
    }
}

/// Builds a request packet (test and client helper).
pub fn build_request(
    opcode: u8,
    vbucket: u16,
    datatype: Datatype,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> Vec<u8> {
    let header = RequestHeader {
        magic: MAGIC_REQUEST,
        opcode,
        key_len: key.len() as u16,
        extras_len: extras.len() as u8,
        datatype,
        vbucket,
        body_len: (extras.len() + key.len() + value.len()) as u32,
        opaque: 0,
        cas,
    };
    let mut packet = Vec::with_capacity(HEADER_LEN + extras.len() + key.len() + value.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(extras);
    packet.extend_from_slice(key);
    packet.extend_from_slice(value);
    packet
}
