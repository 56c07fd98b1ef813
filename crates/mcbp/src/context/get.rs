//! The GET command state machine.

use driftkv_kv::{Bucket, GetOptions, Item};
use driftkv_types::datatype::Datatype;
use driftkv_types::key::DocKey;
use driftkv_types::{CookieId, Status, Vbid};
use tracing::{debug, warn};

use crate::features::{Connection, ConnectionState, Response};
use crate::xattr;
use crate::PayloadInflater;

/// States of a GET command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetState {
    /// Fetch the item from the engine.
    GetItem,
    /// Decompress the payload before responding.
    InflateItem,
    /// Assemble the success response.
    SendResponse,
    /// Handle the miss (respond or advance silently).
    NoSuchItem,
    /// Finished.
    Done,
}

/// Context for one GET / GETQ / GETK / GETKQ request.
pub struct GetCommandContext<'a> {
    bucket: &'a Bucket,
    connection: &'a mut Connection,
    inflater: &'a dyn PayloadInflater,
    key: DocKey,
    vbid: Vbid,
    cookie: CookieId,
    quiet: bool,
    want_key: bool,
    state: GetState,
    item: Option<Item>,
    payload: Vec<u8>,
}

impl<'a> GetCommandContext<'a> {
    /// Creates a context for a decoded GET-family request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket: &'a Bucket,
        connection: &'a mut Connection,
        inflater: &'a dyn PayloadInflater,
        key: DocKey,
        vbid: Vbid,
        cookie: CookieId,
        quiet: bool,
        want_key: bool,
    ) -> Self {
        Self {
            bucket,
            connection,
            inflater,
            key,
            vbid,
            cookie,
            quiet,
            want_key,
            state: GetState::GetItem,
            item: None,
            payload: Vec::new(),
        }
    }

    /// Current state, for re-drive diagnostics.
    pub fn state(&self) -> GetState {
        self.state
    }

    /// Drives the context until it completes or must block.
    pub fn step(&mut self) -> Status {
        loop {
            let ret = match self.state {
                GetState::GetItem => self.get_item(),
                GetState::NoSuchItem => self.no_such_item(),
                GetState::InflateItem => self.inflate_item(),
                GetState::SendResponse => self.send_response(),
                GetState::Done => return Status::Success,
            };
            if ret != Status::Success {
                return ret;
            }
        }
    }

    fn get_item(&mut self) -> Status {
        let result = self.bucket.get(&self.key, self.vbid, self.cookie, GetOptions::default());
        match result.status {
            Status::Success => {
                let item = result.item.unwrap_or_else(|| {
                    Item::new(self.key.clone(), self.vbid, Vec::new(), 0, 0, Datatype::RAW)
                });
                self.payload = item.value.clone();

                // A snappy value must be inflated when it hides an xattr
                // section or the client never advertised snappy.
                let need_inflate = item.datatype.is_snappy()
                    && (item.datatype.is_xattr() || !self.connection.features.snappy);
                self.item = Some(item);
                self.state =
                    if need_inflate { GetState::InflateItem } else { GetState::SendResponse };
                Status::Success
            }
            Status::KeyNoent => {
                self.state = GetState::NoSuchItem;
                Status::Success
            }
            other => other,
        }
    }

    fn inflate_item(&mut self) -> Status {
        match self.inflater.inflate(&self.payload) {
            Some(inflated) => {
                self.payload = inflated;
                if let Some(item) = self.item.as_mut() {
                    item.datatype = item.datatype.without_snappy();
                }
                self.state = GetState::SendResponse;
                Status::Success
            }
            None => {
                warn!(key = %self.key, "failed to inflate item");
                Status::Failed
            }
        }
    }

    fn send_response(&mut self) -> Status {
        let Some(item) = self.item.as_ref() else {
            return Status::Failed;
        };
        let mut datatype = item.datatype;
        let mut payload = std::mem::take(&mut self.payload);

        // Strip the xattr section for clients that never asked for it.
        if datatype.is_xattr() && !self.connection.features.xattr {
            payload = xattr::get_body(&payload).to_vec();
            datatype = datatype.without_xattr();
        }
        let datatype = self.connection.features.enabled_datatypes(datatype);

        self.connection.set_cas(item.cas);
        let key = if self.want_key { item.key.data().to_vec() } else { Vec::new() };
        self.connection.set_response(Response {
            status: 0,
            datatype,
            cas: item.cas,
            extras: item.flags.to_be_bytes().to_vec(),
            key,
            value: payload,
        });

        debug!(key = %self.key, "document read");
        self.connection.incr_stat(&self.connection.stats().get_hits);

        self.state = GetState::Done;
        Status::Success
    }

    fn no_such_item(&mut self) -> Status {
        self.connection.incr_stat(&self.connection.stats().get_misses);

        if self.quiet {
            // Quiet variants swallow the miss and move on.
            self.connection.set_state(ConnectionState::NewCmd);
        } else if self.want_key {
            self.connection.set_response(Response {
                status: Status::KeyNoent.response_code().unwrap_or(0x01),
                datatype: Datatype::RAW,
                cas: 0,
                extras: Vec::new(),
                key: self.key.data().to_vec(),
                value: Vec::new(),
            });
        } else {
            self.connection.set_cas(0);
            self.connection.write_packet(Status::KeyNoent.response_code().unwrap_or(0x01));
        }

        self.state = GetState::Done;
        Status::Success
    }
}
