//! Thin platform layer: raw epoll, eventfd and socket-option bindings.
//!
//! Everything above this module talks to the reactor through
//! [`crate::reactor`], never through `libc` directly.

pub(crate) mod epoll;
pub(crate) mod eventfd;
mod fd;
mod socket;

pub(crate) use fd::FileDesc;
pub(crate) use socket::{set_nodelay, set_nonblocking, set_reuseaddr};

macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) use syscall;
