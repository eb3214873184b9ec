//! Outbound client (spec C12): `call(peer, request) -> reply`, semantically
//! blocking but actually suspending the calling fiber until a reply frame
//! arrives on the dialed connection, or its read deadline fires.
//!
//! Connection pooling is grounded on the teacher's `cache::lru_cache`
//! (`LruCache<peer, idle conn ids>`, bounded by distinct peers tracked, not
//! by in-flight connections per peer). The pool and the pending-reply
//! registry are thread-local rather than shared: a `Conn` belongs to
//! exactly one `EventLoop`, and `call` only ever runs inside a fiber
//! already pinned to that loop's thread, so there is nothing to
//! synchronize.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::RwLock;
use std::time::Duration;

use crate::cache::lru_cache::LruCache;
use crate::conn::{Conn, ConnId, ConnState, DeadlineKind, Role};
use crate::error::client::CallError;
use crate::event_loop::with_current_loop;
use crate::fiber::{self, FiberId, Resume};
use crate::net::tcp::TcpStream;
use crate::reactor::Ready;
use crate::rendezvous::RendezvousHash;
use crate::transport::http::HttpReplyTransport;
use crate::transport::lenprefixed::{encode_frame as encode_lenprefixed, LenPrefixedTransport};
use crate::transport::thrift::{encode_frame as encode_thrift, ThriftTransport};
use crate::transport::{Frame, Transport};

/// The wire-framing seam a protocol plugs into the outbound call path
/// (spec §9 design note): build a request frame, and hand back a fresh
/// `Transport` able to decode that protocol's replies. Replacing the
/// template-heavy client wrappers the original framework used for this.
pub trait ProtocolCodec: Send + Sync {
    fn encode_request(&self, sequence_id: Option<u32>, payload: &[u8]) -> Vec<u8>;
    fn new_transport(&self) -> Box<dyn Transport>;
    /// Whether this protocol carries a sequence id to correlate replies
    /// (Thrift-like) or only ever has one request in flight per
    /// connection (the custom length-prefixed protocol).
    fn uses_sequence_id(&self) -> bool;
}

pub struct ThriftCodec;

impl ProtocolCodec for ThriftCodec {
    fn encode_request(&self, sequence_id: Option<u32>, payload: &[u8]) -> Vec<u8> {
        encode_thrift(sequence_id.unwrap_or(0), payload)
    }

    fn new_transport(&self) -> Box<dyn Transport> {
        Box::new(ThriftTransport::new())
    }

    fn uses_sequence_id(&self) -> bool {
        true
    }
}

pub struct LenPrefixedCodec;

impl ProtocolCodec for LenPrefixedCodec {
    fn encode_request(&self, _sequence_id: Option<u32>, payload: &[u8]) -> Vec<u8> {
        encode_lenprefixed(payload)
    }

    fn new_transport(&self) -> Box<dyn Transport> {
        Box::new(LenPrefixedTransport::new())
    }

    fn uses_sequence_id(&self) -> bool {
        false
    }
}

/// Forwards an already wire-encoded HTTP request (spec C12's proxy mode):
/// `encode_request` has already done the framing, so this codec's own
/// `encode_request` is the identity function. Replies are captured as raw
/// bytes by `HttpReplyTransport` and decoded on demand with
/// `transport::http::parse_response`.
pub struct HttpCodec;

impl ProtocolCodec for HttpCodec {
    fn encode_request(&self, _sequence_id: Option<u32>, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    fn new_transport(&self) -> Box<dyn Transport> {
        Box::new(HttpReplyTransport::new())
    }

    fn uses_sequence_id(&self) -> bool {
        false
    }
}

/// Sentinel pending-registry key for protocols without a sequence id:
/// at most one request may be in flight per such connection.
const NO_SEQUENCE_ID: u32 = u32::MAX;

struct PendingEntry {
    fiber: FiberId,
    result: Rc<RefCell<Option<Result<Vec<u8>, CallError>>>>,
}

thread_local! {
    static PENDING: RefCell<HashMap<(ConnId, u32), PendingEntry>> = RefCell::new(HashMap::new());
    static POOL: RefCell<LruCache<String, Vec<ConnId>>> = RefCell::new(LruCache::new(64));
    static CONN_PEER: RefCell<HashMap<ConnId, String>> = RefCell::new(HashMap::new());
}

/// A logical upstream: either a single address or a weighted cluster
/// resolved via rendezvous hashing (spec §4.6 "Load balancing").
pub struct Client {
    codec: Box<dyn ProtocolCodec>,
    nodes: RwLock<RendezvousHash>,
    read_timeout: Duration,
}

impl Client {
    pub fn new(codec: Box<dyn ProtocolCodec>, read_timeout: Duration) -> Client {
        Client {
            codec,
            nodes: RwLock::new(RendezvousHash::new()),
            read_timeout,
        }
    }

    /// Configures cluster membership for load-balanced calls. A single
    /// `("host:port", 1)` entry makes `call` always dial that one peer.
    pub fn set_nodes(&self, nodes: Vec<(String, u64)>) {
        self.nodes.write().unwrap().build(nodes);
    }

    fn pick_peer(&self, key: u64, rank: usize) -> Option<String> {
        let nodes = self.nodes.read().unwrap();
        nodes.get(key, rank).map(str::to_owned)
    }

    /// Routes `payload` to the node selected for `routing_key` (rendezvous
    /// rank 0), suspending the calling fiber until the reply arrives or
    /// the read deadline expires. Must be called from within a fiber
    /// running on an `EventLoop` thread.
    pub fn call(&self, routing_key: u64, payload: &[u8]) -> Result<Vec<u8>, CallError> {
        let peer = self
            .pick_peer(routing_key, 0)
            .ok_or_else(|| CallError::Io(io::Error::new(io::ErrorKind::NotFound, "no nodes configured")))?;
        self.call_peer(&peer, payload)
    }

    /// Calls a specific address directly, bypassing load balancing.
    pub fn call_peer(&self, peer: &str, payload: &[u8]) -> Result<Vec<u8>, CallError> {
        let fiber_id = fiber::current()
            .ok_or_else(|| CallError::Io(io::Error::new(io::ErrorKind::Other, "call() not running inside a fiber")))?;

        let id = self.acquire_conn(peer)?;

        let sequence_id = with_current_loop(|loop_| {
            loop_
                .get_conn_mut(id)
                .map(|conn| self.codec.uses_sequence_id().then(|| conn.next_sequence_id()))
        })
        .flatten()
        .flatten();

        let wire = self.codec.encode_request(sequence_id, payload);
        let key = sequence_id.unwrap_or(NO_SEQUENCE_ID);

        let result = Rc::new(RefCell::new(None));
        PENDING.with(|p| {
            p.borrow_mut().insert(
                (id, key),
                PendingEntry {
                    fiber: fiber_id,
                    result: result.clone(),
                },
            )
        });

        let armed = with_current_loop(|loop_| {
            if let Some(conn) = loop_.get_conn_mut(id) {
                conn.transport.send_header(wire);
                conn.bound_fiber = Some(fiber_id);
                conn.state = ConnState::ToWrite;
            } else {
                return false;
            }
            let _ = loop_.modify(id, Ready::writable());
            loop_.schedule_timeout(id, DeadlineKind::Read, self.read_timeout);
            true
        })
        .unwrap_or(false);

        if !armed {
            PENDING.with(|p| p.borrow_mut().remove(&(id, key)));
            return Err(CallError::Closed);
        }

        let resume = fiber::yield_now();

        let outcome = PENDING.with(|p| p.borrow_mut().remove(&(id, key)));
        match resume {
            Resume::Cancelled => {
                drop(outcome);
                let timed_out = with_current_loop(|loop_| {
                    matches!(loop_.get_conn(id).map(|c| c.state), Some(ConnState::Timeout))
                })
                .unwrap_or(false);
                if timed_out {
                    Err(CallError::Timeout)
                } else {
                    Err(CallError::Closed)
                }
            }
            Resume::Normal => {
                let reply = result.borrow_mut().take();
                match reply {
                    Some(r) => r,
                    None => Err(CallError::Closed),
                }
            }
        }
    }

    /// Pops an idle pooled connection to `peer` if one exists and still
    /// looks usable, otherwise dials a fresh one and registers it on the
    /// current `EventLoop` (spec §4.6 step 1).
    fn acquire_conn(&self, peer: &str) -> Result<ConnId, CallError> {
        let pooled = POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            match pool.pop(&peer.to_owned()) {
                Some(mut idle) => {
                    let id = idle.pop();
                    if !idle.is_empty() {
                        pool.put(peer.to_owned(), idle);
                    }
                    id
                }
                None => None,
            }
        });

        if let Some(id) = pooled {
            let still_usable = with_current_loop(|loop_| loop_.get_conn(id).is_some()).unwrap_or(false);
            if still_usable {
                return Ok(id);
            }
        }

        let stream = TcpStream::connect(peer).map_err(CallError::Io)?;
        let transport = self.codec.new_transport();
        let id = with_current_loop(|loop_| {
            loop_.insert_conn(
                move |id| Conn::new(id, Role::Client, stream, transport),
                Ready::writable(),
            )
        })
        .ok_or_else(|| CallError::Io(io::Error::new(io::ErrorKind::Other, "no event loop on this thread")))?
        .map_err(CallError::Io)?;

        CONN_PEER.with(|m| m.borrow_mut().insert(id, peer.to_owned()));
        Ok(id)
    }
}

/// Invoked by `event_handler::on_read` for `Role::Client` connections
/// instead of the server-side `Dispatch` path: correlates the frame to a
/// pending `call`, wakes its fiber, and returns the connection to the
/// idle pool for reuse (spec §4.6 step 6).
pub(crate) fn handle_replies(id: ConnId, frames: Vec<Frame>) {
    for frame in frames {
        let (key, payload) = match frame {
            Frame::Binary { sequence_id, payload } => (sequence_id, payload),
            Frame::LenPrefixed(payload) => (NO_SEQUENCE_ID, payload),
            Frame::HttpReply(raw) => (NO_SEQUENCE_ID, raw),
            Frame::Http(_) => continue,
        };

        let entry = PENDING.with(|p| p.borrow_mut().remove(&(id, key)));
        if let Some(entry) = entry {
            *entry.result.borrow_mut() = Some(Ok(payload));
            fiber::mark_runnable(entry.fiber, Resume::Normal);
        }
    }

    with_current_loop(|loop_| {
        if let Some(conn) = loop_.get_conn_mut(id) {
            conn.bound_fiber = None;
            conn.state = ConnState::Next;
        }
        loop_.clear_timeout(id, DeadlineKind::Read);
    });

    let peer = CONN_PEER.with(|m| m.borrow().get(&id).cloned());
    if let Some(peer) = peer {
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            let mut idle = pool.pop(&peer).unwrap_or_default();
            idle.push(id);
            pool.put(peer, idle);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrift_codec_round_trips_sequence_id() {
        let codec = ThriftCodec;
        let wire = codec.encode_request(Some(7), b"ping");
        let mut transport = codec.new_transport();
        let mut input = crate::buffer::ByteChain::new();
        input.append(wire);
        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Binary { sequence_id, .. } => assert_eq!(*sequence_id, 7),
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn len_prefixed_codec_has_no_sequence_id() {
        let codec = LenPrefixedCodec;
        assert!(!codec.uses_sequence_id());
        let wire = codec.encode_request(None, b"hi");
        assert_eq!(&wire[4..], b"hi");
    }

    #[test]
    fn http_codec_frames_a_complete_reply() {
        let codec = HttpCodec;
        assert!(!codec.uses_sequence_id());
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec();
        assert_eq!(codec.encode_request(None, &wire), wire);

        let mut transport = codec.new_transport();
        let mut input = crate::buffer::ByteChain::new();
        input.append(wire.clone());
        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::HttpReply(raw) => assert_eq!(raw, &wire),
            _ => panic!("wrong frame kind"),
        }
    }
}
