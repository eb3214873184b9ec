//! Stateless per-readiness state machine driver (spec C3/C6), grounded on
//! `original_source/raster/io/event/EventHandler.h`'s design: a single
//! value holding no per-connection state, taking the owning `EventLoop`
//! and a `Conn` id on every call and re-resolving the `Conn` each time.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::buffer::{MAX_READ_SIZE, MIN_READ_SIZE};
use crate::conn::{ConnId, ConnState, DeadlineKind, Role};
use crate::dispatcher::Dispatch;
use crate::error::ServiceError;
use crate::event_loop::EventLoop;
use crate::reactor::Ready;

pub enum ReadinessKind {
    Read,
    Write,
    Error,
}

#[derive(Clone)]
pub struct EventHandler {
    dispatch: Arc<dyn Dispatch>,
    read_timeout: Duration,
}

impl EventHandler {
    pub fn new(dispatch: Arc<dyn Dispatch>, read_timeout: Duration) -> EventHandler {
        EventHandler {
            dispatch,
            read_timeout,
        }
    }

    /// New server-side `Conn` accepted by `acceptor.rs`: arm the read
    /// timeout and the first read interest.
    pub fn on_listen(&self, loop_: &mut EventLoop, id: ConnId) {
        loop_.schedule_timeout(id, DeadlineKind::Read, self.read_timeout);
        if let Some(conn) = loop_.get_conn_mut(id) {
            conn.state = ConnState::ToRead;
        }
    }

    /// New client-side `Conn` just connected (non-blocking `connect()`
    /// completed, spec §4.3 client path).
    pub fn on_connect(&self, loop_: &mut EventLoop, id: ConnId) {
        loop_.clear_timeout(id, DeadlineKind::Connect);
        if let Some(conn) = loop_.get_conn_mut(id) {
            conn.state = ConnState::ToWrite;
        }
        let _ = loop_.modify(id, Ready::writable());
    }

    pub fn on_read(&self, loop_: &mut EventLoop, id: ConnId) {
        let mut buf = [0u8; MAX_READ_SIZE];
        loop {
            let conn = match loop_.get_conn_mut(id) {
                Some(c) => c,
                None => return,
            };
            conn.state = ConnState::Reading;

            let want = MIN_READ_SIZE.min(buf.len());
            match conn.socket.read(&mut buf[..want]) {
                Ok(0) => {
                    self.fail(loop_, id, "peer closed connection");
                    return;
                }
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    let frames = {
                        let conn = loop_.get_conn_mut(id).expect("conn resolved above");
                        conn.read_buf.append(chunk);
                        // Bytes left over from a prior read() stay in
                        // `read_buf` across calls, so a frame split across
                        // reads accumulates instead of being dropped (spec
                        // §4.2 read-side: "on needing more bytes, return
                        // without consuming").
                        conn.transport.process_read_data(&mut conn.read_buf)
                    };

                    match frames {
                        Ok(frames) if frames.is_empty() => continue,
                        Ok(frames) => {
                            loop_.clear_timeout(id, DeadlineKind::Read);
                            let role = loop_.get_conn_mut(id).map(|conn| {
                                conn.state = ConnState::Readed;
                                conn.role
                            });
                            match role {
                                Some(Role::Server) => self.dispatch.dispatch(id, frames),
                                Some(Role::Client) => crate::client::handle_replies(id, frames),
                                None => {}
                            }
                            // Edge-triggered epoll only re-notifies on a
                            // not-readable -> readable transition, so keep
                            // draining this socket instead of returning
                            // after the first frame batch: bytes still
                            // sitting in the kernel buffer past this read()
                            // would otherwise never trigger another
                            // readiness event.
                            continue;
                        }
                        Err(e) => {
                            self.protocol_error(loop_, id, e);
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.io_fail(loop_, id, e);
                    return;
                }
            }
        }
    }

    pub fn on_write(&self, loop_: &mut EventLoop, id: ConnId) {
        loop {
            let chunk = match loop_.get_conn_mut(id) {
                Some(conn) => {
                    conn.state = ConnState::Writing;
                    let buf = conn.transport.write_buffer();
                    if buf.is_empty() {
                        None
                    } else {
                        let take = buf.len().min(MAX_READ_SIZE);
                        buf.coalesce();
                        Some(buf.take(take))
                    }
                }
                None => return,
            };

            let chunk = match chunk {
                Some(chunk) => chunk,
                None => {
                    self.finish_write(loop_, id);
                    return;
                }
            };

            let write_result = match loop_.get_conn_mut(id) {
                Some(conn) => conn.socket.write(&chunk),
                None => return,
            };

            match write_result {
                Ok(0) => {
                    self.fail(loop_, id, "write returned 0");
                    return;
                }
                Ok(n) if n < chunk.len() => {
                    if let Some(conn) = loop_.get_conn_mut(id) {
                        conn.transport.write_buffer().prepend(chunk[n..].to_vec());
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(conn) = loop_.get_conn_mut(id) {
                        conn.transport.write_buffer().prepend(chunk);
                    }
                    return;
                }
                Err(e) => {
                    self.io_fail(loop_, id, e);
                    return;
                }
            }
        }
    }

    /// Write buffer drained: settle keepalive vs. close (spec §4.3 `Writed`
    /// → `Next` | close).
    fn finish_write(&self, loop_: &mut EventLoop, id: ConnId) {
        let (keepalive, role) = match loop_.get_conn_mut(id) {
            Some(conn) => {
                conn.state = ConnState::Writed;
                (conn.keepalive, conn.role)
            }
            None => return,
        };

        let _ = loop_.modify(id, Ready::readable());

        if keepalive {
            if let Some(conn) = loop_.get_conn_mut(id) {
                conn.transport.reset();
                conn.state = ConnState::Next;
            }
            loop_.schedule_timeout(id, DeadlineKind::Read, self.read_timeout);
        } else if matches!(role, Role::Server) {
            loop_.unregister(id);
        }
    }

    /// Deadline fired for `id` (spec §4.3 "any state may jump to Timeout on
    /// deadline expiry, then to Fail").
    pub fn on_timeout(&self, loop_: &mut EventLoop, id: ConnId, _kind: DeadlineKind) {
        if let Some(conn) = loop_.get_conn_mut(id) {
            conn.state = ConnState::Timeout;
            let fiber = conn.bound_fiber.take();
            conn.state = ConnState::Fail;
            if let Some(fiber) = fiber {
                crate::fiber::cancel(fiber);
            }
        }
        debug!("conn {:?} timed out", id);
        loop_.unregister(id);
    }

    pub fn on_error(&self, loop_: &mut EventLoop, id: ConnId, _kind: ReadinessKind) {
        self.fail(loop_, id, "socket readiness reported error/hup");
    }

    fn protocol_error(&self, loop_: &mut EventLoop, id: ConnId, err: ServiceError) {
        warn!("conn {:?} protocol error: {}", id, err);
        self.fail(loop_, id, "protocol error");
    }

    fn io_fail(&self, loop_: &mut EventLoop, id: ConnId, err: io::Error) {
        warn!("conn {:?} io error: {}", id, err);
        self.fail(loop_, id, "io error");
    }

    /// Transitions to `Fail`, resumes a bound fiber with cancellation
    /// exactly once (spec §8 invariant 1), and drops the `Conn`.
    fn fail(&self, loop_: &mut EventLoop, id: ConnId, reason: &str) {
        debug!("conn {:?} failing: {}", id, reason);
        if let Some(conn) = loop_.get_conn_mut(id) {
            conn.state = ConnState::Fail;
            if let Some(fiber) = conn.bound_fiber.take() {
                crate::fiber::cancel(fiber);
            }
        }
        loop_.unregister(id);
    }
}
