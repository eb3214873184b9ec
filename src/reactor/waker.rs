use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;

use crate::reactor::{Epoll, EpollOpt, Ready, Source, Token};
use crate::sys::eventfd::EventFd;

/// Cross-thread wake primitive backed by a Linux eventfd. A level-triggered
/// registration on the counter lets any thread interrupt an `EventLoop`
/// blocked in `epoll_wait`.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<EventFd>,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker {
            inner: Arc::new(EventFd::new()?),
        })
    }

    pub fn wakeup(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn finish(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains or raises the counter depending on the requested readiness.
    /// Used by [`crate::reactor::Queue`] to toggle wakeups on the 0-to-1 and
    /// 1-to-0 pending-item transitions instead of signalling on every push.
    pub fn set_readiness(&self, ready: Ready) -> io::Result<()> {
        if ready == Ready::readable() || ready == Ready::writable() {
            self.wakeup()?;
        }

        if ready == Ready::empty() {
            self.finish()?;
        }

        Ok(())
    }
}

impl FromRawFd for Waker {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Waker {
            inner: Arc::new(unsafe { EventFd::from_raw_fd(fd) }),
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Source for Waker {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.inner.add(epoll, token, interest, opts)
    }

    fn modify(
        &self,
        epoll: &Epoll,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        self.inner.modify(epoll, token, interest, opts)
    }

    fn delete(&self, epoll: &Epoll) -> io::Result<()> {
        self.inner.delete(epoll)
    }
}
