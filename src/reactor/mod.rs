//! The non-blocking I/O core: a thin, validated wrapper around Linux epoll
//! plus the primitives built on top of it (cross-thread waker, evented
//! queue). [`crate::event_loop::EventLoop`] is the only consumer that is
//! meant to see this module's `Epoll` directly; everything above it talks
//! in terms of [`crate::net::tcp::TcpStream`] and [`Source`].

mod event;
mod opts;
mod queue;
mod ready;
mod source;
mod token;
mod waker;

pub use event::{Event, Events, IntoIter, Iter};
pub use opts::EpollOpt;
pub use queue::{ConcurrentQueue, PopError, PushError, Queue};
pub use ready::Ready;
pub use source::Source;
pub use token::Token;
pub use waker::Waker;

use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::sys;

/// Owns one epoll instance. An `EventLoop` holds exactly one `Epoll` and
/// never shares it across threads; sources reach it only through `add`,
/// `modify`, `delete`, each of which validates the requested interest
/// before touching the kernel.
pub struct Epoll(pub(crate) sys::epoll::Epoll);

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        Ok(Epoll(sys::epoll::Epoll::new()?))
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        event::wait(&self.0, events, timeout)
    }

    pub fn add<S>(&self, source: &S, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        validate_interest(interest)?;
        source.add(self, token, interest, opts)
    }

    pub fn modify<S>(
        &self,
        source: &S,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        validate_interest(interest)?;
        source.modify(self, token, interest, opts)
    }

    pub fn delete<S>(&self, source: &S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        source.delete(self)
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl fmt::Debug for Epoll {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Epoll(id = {})", self.0.id())
    }
}

fn validate_interest(interest: Ready) -> io::Result<()> {
    if !interest.is_readable() && !interest.is_writable() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "interest must include readable or writable",
        ));
    }
    Ok(())
}

/// Tracks which `Epoll` a socket has been registered with, so a stray
/// `register` against a second loop fails loudly instead of silently
/// stealing readiness events from the first.
#[derive(Debug, Default)]
pub struct SelectorId {
    id: AtomicUsize,
}

impl SelectorId {
    pub fn new() -> SelectorId {
        SelectorId {
            id: AtomicUsize::new(0),
        }
    }

    pub fn associate_selector(&self, epoll: &Epoll) -> io::Result<()> {
        let current = self.id.load(Ordering::SeqCst);

        if current != 0 && current != epoll.0.id() {
            Err(io::Error::new(io::ErrorKind::Other, "socket already registered with another event loop"))
        } else {
            self.id.store(epoll.0.id(), Ordering::SeqCst);
            Ok(())
        }
    }
}

impl Clone for SelectorId {
    fn clone(&self) -> SelectorId {
        SelectorId {
            id: AtomicUsize::new(self.id.load(Ordering::SeqCst)),
        }
    }
}
