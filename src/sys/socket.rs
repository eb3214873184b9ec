use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use libc::{c_int, c_void};

use crate::sys::syscall;

fn setsockopt<T>(fd: RawFd, level: c_int, name: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;
    syscall!(setsockopt(
        fd,
        level,
        name,
        payload,
        mem::size_of::<T>() as libc::socklen_t
    ))?;
    Ok(())
}

/// `setsockopt(IPPROTO_TCP, TCP_NODELAY)`. Proxies in keepalive-heavy
/// dispatch (spec §4.2) want Nagle's algorithm off so a framed response
/// isn't held back waiting for more bytes to coalesce.
pub(crate) fn set_nodelay(fd: RawFd, nodelay: bool) -> io::Result<()> {
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, nodelay as c_int)
}

/// `setsockopt(SOL_SOCKET, SO_REUSEADDR)`, set before `bind` so a restarted
/// listener doesn't fail with `EADDRINUSE` while old connections drain.
pub(crate) fn set_reuseaddr(fd: RawFd, reuse: bool) -> io::Result<()> {
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, reuse as c_int)
}

/// `ioctl(FIONBIO)`. `std::net` sockets already expose
/// [`std::net::TcpStream::set_nonblocking`]; this exists for raw fds
/// obtained via `accept` before they are wrapped.
pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let mut flag = nonblocking as c_int;
    syscall!(ioctl(fd, libc::FIONBIO, &mut flag)).map(|_| ())
}
