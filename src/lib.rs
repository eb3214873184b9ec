//! kestrel-rt: an epoll-based asynchronous network service framework.
//!
//! An [`event_loop::EventLoop`] multiplexes any number of connections on
//! one OS thread via [`reactor::Epoll`]; request handlers run as
//! lightweight stackful [`fiber`]s bound to that thread, suspending only
//! at explicit yield points (outbound calls, CPU offload). [`transport`]
//! turns a connection's byte stream into framed messages for HTTP/1.x, a
//! Thrift-like binary-framed RPC, and a custom length-prefixed protocol;
//! [`dispatcher`] routes each frame to a registered [`dispatcher::Handler`].
//! [`io_pool`] runs a fixed set of `EventLoop`s across threads; [`client`]
//! lets handler code call back out to other services, with [`rendezvous`]
//! hashing for load-balanced targets.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use kestrel_rt::context::ServiceContext;
//! use kestrel_rt::cpu_pool::CpuPool;
//! use kestrel_rt::dispatcher::{DispatchKey, Dispatcher, Request, Response};
//! use kestrel_rt::event_handler::EventHandler;
//! use kestrel_rt::http::{HttpResponse, Method};
//! use kestrel_rt::io_pool::IoPool;
//! use kestrel_rt::transport::http::HttpTransport;
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(
//!     DispatchKey::Http { method: Method::Get, path: "/".into() },
//!     Arc::new(|_req: Request| Response::Http(HttpResponse::with_body(200, b"ok".to_vec()))),
//! );
//! dispatcher.freeze();
//!
//! let context = ServiceContext::new(Arc::new(dispatcher), Arc::new(CpuPool::new(2)), Duration::from_secs(30));
//! let pool = IoPool::new(&context, 1).unwrap();
//! let handler = EventHandler::new(context.dispatch.clone(), context.read_timeout);
//! pool.bind_acceptor("127.0.0.1:0", || Box::new(HttpTransport::new()), handler).unwrap();
//! ```

pub mod acceptor;
mod buffer;
pub mod cache;
pub mod client;
pub mod conn;
pub mod config;
pub mod context;
pub mod cpu_pool;
pub mod dispatcher;
pub mod error;
pub mod event_handler;
pub mod event_loop;
pub mod fiber;
pub mod http;
pub mod io_pool;
pub mod net;
pub mod reactor;
pub mod rendezvous;
mod sys;
mod timer;
pub mod transport;

pub use error::{ServiceError, ServiceResult};
