//! Listening socket lifecycle (spec C7): accepts new connections and hands
//! them to an `EventLoop` as server-side `Conn`s.

use std::io;
use std::net::ToSocketAddrs;

use log::warn;

use crate::conn::{Conn, Role};
use crate::event_handler::EventHandler;
use crate::event_loop::EventLoop;
use crate::net::tcp::TcpListener;
use crate::reactor::Ready;
use crate::transport::Transport;

/// Which protocol's `Transport` new connections on this listener get.
pub type TransportFactory = fn() -> Box<dyn Transport>;

pub struct Acceptor {
    listener: TcpListener,
    transport_factory: TransportFactory,
    handler: EventHandler,
}

impl Acceptor {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        transport_factory: TransportFactory,
        handler: EventHandler,
    ) -> io::Result<Acceptor> {
        Ok(Acceptor {
            listener: TcpListener::bind(addr)?,
            transport_factory,
            handler,
        })
    }

    pub(crate) fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// Drains every pending connection (edge-triggered: must accept until
    /// `WouldBlock`) and inserts each as a new server-side `Conn`.
    pub fn accept_all(&self, loop_: &mut EventLoop) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let transport = (self.transport_factory)();
                    let result = loop_.insert_conn(
                        move |id| Conn::new(id, Role::Server, stream, transport),
                        Ready::readable(),
                    );
                    match result {
                        Ok(id) => self.handler.on_listen(loop_, id),
                        Err(e) => warn!("failed to register accepted conn: {}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }
}
