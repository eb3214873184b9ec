use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use crate::reactor::{Epoll, EpollOpt, Ready, Source, Token};
use crate::sys::syscall;

use super::fd::FileDesc;

const EFD_CLOEXEC: i32 = libc::EFD_CLOEXEC;
const EFD_NONBLOCK: i32 = libc::EFD_NONBLOCK;

/// A Linux `eventfd(2)` counter used as the wake-up primitive for
/// [`crate::reactor::Waker`] and the cross-thread callback queue.
#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    /// Creates an eventfd with initval 0 and flags `EFD_CLOEXEC | EFD_NONBLOCK`.
    /// See <http://man7.org/linux/man-pages/man2/eventfd.2.html>.
    pub fn new() -> io::Result<EventFd> {
        let flags = EFD_CLOEXEC | EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;

        Ok(EventFd {
            inner: unsafe { FileDesc::from_raw_fd(fd) },
        })
    }

    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf: [u8; 8] = val.to_ne_bytes();
        (&self.inner).write_all(&buf)?;
        Ok(())
    }
}

impl FromRawFd for EventFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        EventFd {
            inner: FileDesc::from_raw_fd(fd),
        }
    }
}

impl IntoRawFd for EventFd {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Source for EventFd {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.as_raw_fd().add(epoll, token, interest, opts)
    }

    fn modify(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.as_raw_fd().modify(epoll, token, interest, opts)
    }

    fn delete(&self, epoll: &Epoll) -> io::Result<()> {
        self.as_raw_fd().delete(epoll)
    }
}

#[cfg(test)]
mod test {
    use super::EventFd;

    #[test]
    fn write_and_read() {
        let eventfd = EventFd::new().unwrap();
        eventfd.write(123).unwrap();
        let count = eventfd.read().unwrap();
        assert_eq!(123, count);
    }

    #[test]
    fn write_saturates_and_then_blocks() {
        let eventfd = EventFd::new().unwrap();

        assert!(eventfd.write(0xffff_ffff_ffff_fffe).is_ok());
        assert!(eventfd.write(0xffff_ffff_ffff_fffe).is_err());
    }
}
