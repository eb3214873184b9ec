//! The per-connection control block (spec C3, "Event"). Renamed `Conn`
//! here so it doesn't collide with [`crate::reactor::Event`], the
//! reactor's own low-level readiness notification.

use std::time::Instant;

use crate::buffer::ByteChain;
use crate::fiber::FiberId;
use crate::net::tcp::TcpStream;
use crate::transport::Transport;

/// Generational id for arena-backed `Conn` lookups (spec §9 design note):
/// the slot is reused by `slab::Slab`, the generation distinguishes a
/// stale handle (held by a suspended fiber, say) from the live occupant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub slot: u32,
    pub generation: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Listen,
    Connect,
    ToRead,
    Reading,
    Readed,
    ToWrite,
    Writing,
    Writed,
    Next,
    Timeout,
    Error,
    Fail,
}

impl ConnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnState::Error | ConnState::Fail)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeadlineKind {
    Connect,
    Read,
    Write,
}

/// Zero means "none" per spec §8 boundary behavior.
#[derive(Copy, Clone, Debug, Default)]
pub struct Deadlines {
    pub connect: Option<Instant>,
    pub read: Option<Instant>,
    pub write: Option<Instant>,
}

impl Deadlines {
    pub fn set(&mut self, kind: DeadlineKind, at: Instant) {
        match kind {
            DeadlineKind::Connect => self.connect = Some(at),
            DeadlineKind::Read => self.read = Some(at),
            DeadlineKind::Write => self.write = Some(at),
        }
    }

    pub fn clear(&mut self, kind: DeadlineKind) {
        match kind {
            DeadlineKind::Connect => self.connect = None,
            DeadlineKind::Read => self.read = None,
            DeadlineKind::Write => self.write = None,
        }
    }

    /// Returns the earliest expired deadline, if any, along with its kind.
    pub fn earliest_expired(&self, now: Instant) -> Option<DeadlineKind> {
        let mut candidates = [
            (self.connect, DeadlineKind::Connect),
            (self.read, DeadlineKind::Read),
            (self.write, DeadlineKind::Write),
        ];
        candidates.sort_by_key(|(at, _)| *at);
        candidates
            .into_iter()
            .find_map(|(at, kind)| at.filter(|&at| at <= now).map(|_| kind))
    }
}

pub struct Conn {
    pub id: ConnId,
    pub role: Role,
    pub socket: TcpStream,
    pub transport: Box<dyn Transport>,
    /// Bytes read off the socket but not yet consumed into a complete
    /// frame. Persists across `on_read` calls so a frame split across
    /// multiple `read()`s accumulates instead of being dropped at the end
    /// of whichever call read the first part (spec §4.2 read-side: "on
    /// needing more bytes, return without consuming").
    pub read_buf: ByteChain,
    pub deadlines: Deadlines,
    pub state: ConnState,
    pub bound_fiber: Option<FiberId>,
    pub sequence_id: Option<u32>,
    pub keepalive: bool,
}

impl Conn {
    pub fn new(id: ConnId, role: Role, socket: TcpStream, transport: Box<dyn Transport>) -> Conn {
        Conn {
            id,
            role,
            socket,
            transport,
            read_buf: ByteChain::new(),
            deadlines: Deadlines::default(),
            state: ConnState::Init,
            bound_fiber: None,
            sequence_id: None,
            keepalive: false,
        }
    }

    /// Bumps `sequence_id`, wrapping rather than panicking — spec treats
    /// the counter as per-connection monotonic, not globally unique.
    pub fn next_sequence_id(&mut self) -> u32 {
        let next = self.sequence_id.map(|s| s.wrapping_add(1)).unwrap_or(0);
        self.sequence_id = Some(next);
        next
    }
}
