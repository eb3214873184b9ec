//! Protocol framing state machines (spec C4): turn a byte stream into
//! message boundaries and back. One `Transport` instance is owned by
//! exactly one [`crate::conn::Conn`] for its lifetime.

pub mod http;
pub mod lenprefixed;
pub mod thrift;

use crate::buffer::ByteChain;
use crate::error::ServiceResult;

/// Mirrors spec §3's transport-local ingress state, separate from the
/// connection's own `ConnState`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IngressState {
    Init,
    OnReading,
    Finish,
    Error,
}

/// A complete inbound message, protocol-specific payload attached.
pub enum Frame {
    Http(crate::http::HttpMessage),
    /// Binary framed (Thrift-like): payload plus the sequence id read out
    /// of it for reply correlation (spec §4.2).
    Binary { sequence_id: u32, payload: Vec<u8> },
    /// Custom length-prefixed: opaque payload, no sequence id.
    LenPrefixed(Vec<u8>),
    /// A complete HTTP response read on an outbound (client-role)
    /// connection, captured as raw wire bytes. Decoded on demand via
    /// `transport::http::parse_response` once handed back to the caller
    /// of `client::Client::call_peer` (spec C12's forwarding path).
    HttpReply(Vec<u8>),
}

/// Two-sided state machine operating on a Conn's read/write buffers (spec
/// §4.2). Implementations own their own read/write `ByteChain`s so the
/// `Conn` doesn't need to know protocol-specific buffering details.
pub trait Transport: Send {
    /// Called after every successful read into the read buffer. Parses
    /// zero or more complete frames, handing each to the caller; returns
    /// without consuming on a partial frame. Malformed input is reported
    /// as `Err` and the caller transitions the owning `Conn` to `Error`.
    fn process_read_data(&mut self, input: &mut ByteChain) -> ServiceResult<Vec<Frame>>;

    /// Queues `size` bytes worth of framing/header material to the write
    /// buffer ahead of the body (e.g. an HTTP status line + headers, or a
    /// length prefix).
    fn send_header(&mut self, header: Vec<u8>);

    /// Queues a body chain to the write buffer.
    fn send_body(&mut self, body: ByteChain);

    /// Bytes ready to be written to the socket.
    fn write_buffer(&mut self) -> &mut ByteChain;

    fn ingress_state(&self) -> IngressState;

    /// Resets transport-local state for the next message on a keepalive
    /// connection.
    fn reset(&mut self);
}
