//! Fixed I/O thread pool (spec C8): `N` OS threads, each owning and
//! driving exactly one [`EventLoop`] to completion. New work — a listener
//! to register, or an arbitrary callback — is placed round-robin across
//! the pool, grounded on
//! `original_source/raster/concurrency/IOThreadPoolExecutor.cpp`'s
//! `pickThread()` (`nextThread_.fetch_add(1, Relaxed) % n`).

use std::io;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::error;

use crate::acceptor::{Acceptor, TransportFactory};
use crate::context::ServiceContext;
use crate::event_handler::EventHandler;
use crate::event_loop::{Callback, EventLoop};

pub struct IoPool {
    senders: Vec<crate::reactor::Queue<Callback>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl IoPool {
    /// Spawns `threads` loop-owning OS threads, each running
    /// `EventLoop::run_forever()` with its own `EventHandler` sharing the
    /// context's dispatcher (spec §9: the context is constructed once by
    /// the caller and threaded through here, never reached for globally).
    pub fn new(context: &ServiceContext, threads: usize) -> io::Result<IoPool> {
        assert!(threads > 0, "io pool needs at least one thread");

        let mut senders = Vec::with_capacity(threads);
        let mut handles = Vec::with_capacity(threads);

        for idx in 0..threads {
            let handler = EventHandler::new(context.dispatch.clone(), context.read_timeout);
            let mut event_loop = EventLoop::new(handler)?;
            senders.push(event_loop.callback_sender());

            let handle = std::thread::Builder::new()
                .name(format!("kestrel-io-{idx}"))
                .spawn(move || {
                    if let Err(e) = event_loop.run_forever() {
                        error!("io thread {idx} exited with error: {e}");
                    }
                })?;
            handles.push(handle);
        }

        Ok(IoPool {
            senders,
            handles,
            next: AtomicUsize::new(0),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.senders.len()
    }

    fn pick(&self) -> usize {
        self.next.fetch_add(1, Relaxed) % self.senders.len()
    }

    /// Hands a unit of work to the next loop in round-robin order.
    pub fn dispatch(&self, f: impl FnOnce(&mut EventLoop) + Send + 'static) {
        let idx = self.pick();
        if self.senders[idx].push(Box::new(f)).is_err() {
            error!("io thread {idx} callback queue closed, dropping work");
        }
    }

    /// Binds a listening socket and registers it on the next loop in
    /// round-robin order (spec C7 + C8: listener placement is itself a
    /// unit of work the pool distributes).
    pub fn bind_acceptor<A: ToSocketAddrs>(
        &self,
        addr: A,
        transport_factory: TransportFactory,
        handler: EventHandler,
    ) -> io::Result<()> {
        let acceptor = Arc::new(Acceptor::bind(addr, transport_factory, handler)?);
        self.dispatch(move |loop_| {
            if let Err(e) = loop_.register_acceptor(acceptor) {
                error!("failed to register acceptor: {e}");
            }
        });
        Ok(())
    }

    /// Signals every loop to stop after its current iteration and waits
    /// for all I/O threads to exit.
    pub fn stop(self) {
        for sender in &self.senders {
            let _ = sender.push(Box::new(|loop_: &mut EventLoop| loop_.stop()));
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
