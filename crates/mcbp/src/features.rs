//! Per-connection negotiated features and response assembly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use driftkv_types::datatype::Datatype;

/// HELLO feature code: datatype awareness.
pub const FEATURE_DATATYPE: u16 = 0x01;
/// HELLO feature code: mutation seqno extras.
pub const FEATURE_MUTATION_SEQNO: u16 = 0x04;
/// HELLO feature code: extended attributes.
pub const FEATURE_XATTR: u16 = 0x06;
/// HELLO feature code: snappy compression.
pub const FEATURE_SNAPPY: u16 = 0x0a;

/// Capabilities a client advertised via HELLO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientFeatures {
    /// The client understands the datatype field.
    pub datatype: bool,
    /// The client accepts snappy-compressed values.
    pub snappy: bool,
    /// The client may send and receive extended attributes.
    pub xattr: bool,
    /// Mutation responses carry `(vbucket_uuid, seqno)` extras.
    pub mutation_seqno: bool,
    /// The connection speaks collection-aware DCP.
    pub collections: bool,
}

impl ClientFeatures {
    /// Applies the feature codes from a HELLO request.
    pub fn apply_hello(&mut self, features: &[u16]) {
        for &feature in features {
            match feature {
                FEATURE_DATATYPE => self.datatype = true,
                FEATURE_MUTATION_SEQNO => self.mutation_seqno = true,
                FEATURE_XATTR => self.xattr = true,
                FEATURE_SNAPPY => self.snappy = true,
                _ => {}
            }
        }
    }

    /// Masks datatype bits the client did not advertise.
    pub fn enabled_datatypes(&self, datatype: Datatype) -> Datatype {
        let mut out = datatype;
        if !self.snappy {
            out = out.without_snappy();
        }
        if !self.xattr {
            out = out.without_xattr();
        }
        if !self.datatype {
            out = Datatype::from_raw(out.raw() & Datatype::SNAPPY.raw());
        }
        out
    }
}

/// What the connection does after the current command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Read the next command (quiet miss or noreply ack-bypass).
    NewCmd,
    /// Transmit the assembled response.
    SendData,
}

/// An assembled response packet body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Wire status code.
    pub status: u16,
    /// Datatype of the value section.
    pub datatype: Datatype,
    /// CAS echoed in the header.
    pub cas: u64,
    /// Extras section.
    pub extras: Vec<u8>,
    /// Key section.
    pub key: Vec<u8>,
    /// Value section.
    pub value: Vec<u8>,
}

/// Worker-thread command statistics.
#[derive(Debug, Default)]
pub struct McbpStats {
    /// Mutations attempted (SET/ADD/REPLACE/APPEND/PREPEND).
    pub cmd_set: AtomicU64,
    /// CAS mutations that succeeded.
    pub cas_hits: AtomicU64,
    /// CAS mutations that failed the comparison.
    pub cas_badval: AtomicU64,
    /// CAS mutations against missing keys.
    pub cas_misses: AtomicU64,
    /// GETs that found the key.
    pub get_hits: AtomicU64,
    /// GETs that missed.
    pub get_misses: AtomicU64,
}

impl McbpStats {
    /// Creates zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The slice of connection state the command contexts drive.
///
/// The real connection object (sockets, buffers, SASL) lives in the
/// daemon; contexts only need the negotiated features, the response
/// under assembly and the per-thread stats.
#[derive(Debug)]
pub struct Connection {
    /// Negotiated client capabilities.
    pub features: ClientFeatures,
    /// The current command suppresses its success response.
    pub noreply: bool,
    cas: u64,
    state: ConnectionState,
    response: Option<Response>,
    stats: Arc<McbpStats>,
}

impl Connection {
    /// Creates a connection with no negotiated features.
    pub fn new(stats: Arc<McbpStats>) -> Self {
        Self {
            features: ClientFeatures::default(),
            noreply: false,
            cas: 0,
            state: ConnectionState::NewCmd,
            response: None,
            stats,
        }
    }

    /// CAS to echo in the response header.
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Sets the response CAS.
    pub fn set_cas(&mut self, cas: u64) {
        self.cas = cas;
    }

    /// Next connection action.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sets the next connection action.
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// The assembled response, if the command produced one.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Takes the assembled response.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Stores the assembled response and queues it for transmission.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
        self.state = ConnectionState::SendData;
    }

    /// Writes a header-only response with the given status.
    pub fn write_packet(&mut self, status: u16) {
        self.set_response(Response { status, cas: self.cas, ..Response::default() });
    }

    /// Per-thread command statistics.
    pub fn stats(&self) -> &McbpStats {
        &self.stats
    }

    /// Records a statistic by name.
    pub fn incr_stat(&self, stat: &AtomicU64) {
        stat.fetch_add(1, Ordering::Relaxed);
    }
}
