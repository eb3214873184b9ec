use std::io;
use std::os::unix::io::RawFd;

use crate::reactor::{Epoll, EpollOpt, Ready, Token};

/// Anything that can be registered with an [`Epoll`] instance: raw fds,
/// [`crate::reactor::Waker`], and the cross-thread [`crate::reactor::Queue`].
pub trait Source {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()>;

    fn modify(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt)
        -> io::Result<()>;

    fn delete(&self, epoll: &Epoll) -> io::Result<()>;
}

impl Source for RawFd {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        epoll.0.add(*self, token, interest, opts)
    }

    fn modify(
        &self,
        epoll: &Epoll,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        epoll.0.modify(*self, token, interest, opts)
    }

    fn delete(&self, epoll: &Epoll) -> io::Result<()> {
        epoll.0.delete(*self)
    }
}
