//! Request dispatcher (spec C11): decodes a framed message into a request,
//! runs the registered handler in a fiber, frames the response back onto
//! the `Conn`'s write buffer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use log::error;

use crate::conn::ConnId;
use crate::event_loop::with_current_loop;
use crate::http::{HttpMessage, HttpResponse};
use crate::reactor::Ready;
use crate::transport::http::encode_response;
use crate::transport::thrift::encode_frame as encode_thrift_frame;
use crate::transport::{lenprefixed, Frame};

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DispatchKey {
    Http { method: crate::http::Method, path: String },
    Thrift { method: String },
    LenPrefixed,
}

/// One protocol-specific request/response pair handed to and returned from
/// application code. The dispatcher is the only thing that knows how to
/// turn a `Frame` into one of these and a response back into wire bytes.
pub enum Request {
    Http(HttpMessage),
    Thrift { sequence_id: u32, payload: Vec<u8> },
    LenPrefixed(Vec<u8>),
}

pub enum Response {
    Http(HttpResponse),
    Thrift(Vec<u8>),
    LenPrefixed(Vec<u8>),
}

pub trait Handler: Send + Sync {
    fn handle(&self, request: Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Response + Send + Sync,
{
    fn handle(&self, request: Request) -> Response {
        self(request)
    }
}

/// Invoked by `event_handler.rs` once a `Transport` has produced complete
/// frames (spec §4.1 step 3 feeding into §4.5).
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, id: ConnId, frames: Vec<Frame>);
}

/// Extracts a routing method name out of an opaque Thrift payload. The
/// payload's own encoding is out of scope for the core (spec §1); callers
/// plug this in alongside whatever serializer they use. `None` routes
/// every Thrift frame to the single `Thrift { method: String::new() }`
/// entry.
pub type ThriftMethodExtractor = dyn Fn(&[u8]) -> String + Send + Sync;

pub struct Dispatcher {
    handlers: IndexMap<DispatchKey, Arc<dyn Handler>>,
    thrift_method: Option<Arc<ThriftMethodExtractor>>,
    frozen: bool,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            handlers: IndexMap::new(),
            thrift_method: None,
            frozen: false,
        }
    }

    pub fn with_thrift_method_extractor(mut self, f: Arc<ThriftMethodExtractor>) -> Dispatcher {
        self.thrift_method = Some(f);
        self
    }

    /// Registers a handler. Panics if called after `freeze()` — the
    /// registry is build-time only (spec §3 "stable after server start").
    pub fn register(&mut self, key: DispatchKey, handler: Arc<dyn Handler>) {
        assert!(!self.frozen, "cannot register a handler after freeze()");
        self.handlers.insert(key, handler);
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn lookup(&self, key: &DispatchKey) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).cloned()
    }
}

impl Default for Dispatcher {
    fn default() -> Dispatcher {
        Dispatcher::new()
    }
}

impl Dispatch for Dispatcher {
    fn dispatch(&self, id: ConnId, frames: Vec<Frame>) {
        for frame in frames {
            let key = match &frame {
                Frame::Http(msg) => DispatchKey::Http {
                    method: msg.method,
                    path: msg.url.clone(),
                },
                Frame::Binary { .. } => DispatchKey::Thrift {
                    method: match (&self.thrift_method, &frame) {
                        (Some(extract), Frame::Binary { payload, .. }) => extract(payload),
                        _ => String::new(),
                    },
                },
                Frame::LenPrefixed(_) => DispatchKey::LenPrefixed,
                Frame::HttpReply(_) => {
                    unreachable!("HttpReply frames are only produced on client-role connections, never fed to the server dispatcher")
                }
            };

            let handler = self.lookup(&key);
            spawn_dispatch_fiber(id, frame, handler);
        }
    }
}

fn spawn_dispatch_fiber(id: ConnId, frame: Frame, handler: Option<Arc<dyn Handler>>) {
    let body = move || {
        let (request, protocol_hint, keepalive) = match frame {
            Frame::Http(msg) => {
                let keepalive = msg.keep_alive();
                (Request::Http(msg), ProtocolHint::Http, keepalive)
            }
            Frame::Binary { sequence_id, payload } => (
                Request::Thrift { sequence_id, payload },
                ProtocolHint::Thrift(sequence_id),
                true,
            ),
            Frame::LenPrefixed(payload) => {
                (Request::LenPrefixed(payload), ProtocolHint::LenPrefixed, false)
            }
            Frame::HttpReply(_) => {
                unreachable!("HttpReply frames are only produced on client-role connections, never fed to the server dispatcher")
            }
        };

        let response = match handler {
            Some(handler) => {
                match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
                    Ok(resp) => resp,
                    Err(_) => {
                        error!("handler panicked for conn {:?}", id);
                        error_response(protocol_hint)
                    }
                }
            }
            None => not_found_response(protocol_hint),
        };

        let sequence_id = match protocol_hint {
            ProtocolHint::Thrift(seq) => seq,
            _ => 0,
        };
        let wire = encode_response_wire(response, sequence_id);

        with_current_loop(|loop_| {
            if let Some(conn) = loop_.get_conn_mut(id) {
                conn.keepalive = keepalive;
                conn.transport.send_header(wire);
                let _ = loop_.modify(id, Ready::writable());
            }
        });
    };

    if let Err(e) = crate::fiber::spawn(body) {
        error!("failed to spawn dispatch fiber for conn {:?}: {}", id, e);
    }
}

#[derive(Clone, Copy)]
enum ProtocolHint {
    Http,
    Thrift(u32),
    LenPrefixed,
}

fn not_found_response(hint: ProtocolHint) -> Response {
    match hint {
        ProtocolHint::Http => Response::Http(HttpResponse::with_body(
            404,
            b"not found".to_vec(),
        )),
        ProtocolHint::Thrift(_) => Response::Thrift(Vec::new()),
        ProtocolHint::LenPrefixed => Response::LenPrefixed(Vec::new()),
    }
}

fn error_response(hint: ProtocolHint) -> Response {
    match hint {
        ProtocolHint::Http => Response::Http(HttpResponse::with_body(
            500,
            b"internal error".to_vec(),
        )),
        ProtocolHint::Thrift(_) => Response::Thrift(Vec::new()),
        ProtocolHint::LenPrefixed => Response::LenPrefixed(Vec::new()),
    }
}

fn encode_response_wire(response: Response, sequence_id: u32) -> Vec<u8> {
    match response {
        Response::Http(resp) => encode_response(resp),
        Response::Thrift(body) => encode_thrift_frame(sequence_id, &body),
        Response::LenPrefixed(body) => lenprefixed::encode_frame(&body),
    }
}
