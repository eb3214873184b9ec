//! The single-threaded reactor (spec C5). One `EventLoop` owns exactly one
//! `Epoll`, the `Conn` arena, the deadline heap, and the cross-thread
//! callback queue; it never shares any of them across threads.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, warn};
use slab::Slab;

use crate::acceptor::Acceptor;
use crate::conn::{Conn, ConnId, DeadlineKind};
use crate::error::ServiceError;
use crate::event_handler::{EventHandler, ReadinessKind};
use crate::reactor::{Epoll, EpollOpt, Events, Ready, Source, Token};
use crate::timer::Timer;

/// Work handed across threads via [`EventLoop::add_callback`]. Boxed so the
/// queue can hold heterogeneous closures.
pub type Callback = Box<dyn FnOnce(&mut EventLoop) + Send>;

/// Maximum number of cross-thread callbacks drained per iteration (spec
/// §4.1 step 1: "bounded batch; remainder deferred... to avoid starving
/// I/O").
const CALLBACK_BATCH: usize = 256;

/// Upper bound on how long a single `epoll_wait` may block, regardless of
/// the next deadline, so a stop flag set concurrently is noticed promptly.
const MAX_POLL_WAIT: Duration = Duration::from_millis(250);

thread_local! {
    /// Raw pointer to the `EventLoop` currently executing on this thread,
    /// valid only for the duration of `run_once` (including any fibers run
    /// from within it). Lets dispatch code and the outbound client reach
    /// back into the owning loop without a process-wide singleton (spec §9
    /// design note): the pointer's validity is scoped to one call frame on
    /// one thread, not shared state.
    static CURRENT_LOOP: Cell<*mut EventLoop> = const { Cell::new(std::ptr::null_mut()) };
}

/// Runs `f` with mutable access to the `EventLoop` owning the current
/// thread's call stack, if any. Used by fiber bodies (dispatcher, outbound
/// client) that need to touch the loop while running inside
/// `run_runnable`.
pub fn with_current_loop<R>(f: impl FnOnce(&mut EventLoop) -> R) -> Option<R> {
    CURRENT_LOOP.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            None
        } else {
            // Safety: non-null only while `run_once` for this exact loop is
            // on the stack of this exact thread (set/cleared below), and
            // `EventLoop` never migrates threads.
            Some(f(unsafe { &mut *ptr }))
        }
    })
}

pub struct EventLoop {
    epoll: Epoll,
    conns: Slab<Conn>,
    generations: Vec<u32>,
    timer: Timer<(ConnId, DeadlineKind)>,
    timer_handles: HashMap<(ConnId, DeadlineKind), u64>,
    callbacks: crate::reactor::Queue<Callback>,
    callback_token: Token,
    events: Events,
    handler: EventHandler,
    listeners: HashMap<Token, Arc<Acceptor>>,
    next_listener_token: usize,
    running: bool,
}

const CALLBACK_TOKEN: Token = Token(usize::MAX);

impl EventLoop {
    pub fn new(handler: EventHandler) -> std::io::Result<EventLoop> {
        let epoll = Epoll::new()?;
        let callbacks = crate::reactor::Queue::unbounded()?;
        epoll.add(&callbacks, CALLBACK_TOKEN, Ready::readable(), EpollOpt::level())?;

        Ok(EventLoop {
            epoll,
            conns: Slab::new(),
            generations: Vec::new(),
            timer: Timer::new(),
            timer_handles: HashMap::new(),
            callbacks,
            callback_token: CALLBACK_TOKEN,
            events: Events::with_capacity(1024),
            handler,
            listeners: HashMap::new(),
            next_listener_token: 0,
            running: false,
        })
    }

    /// Registers a listening socket with this loop (spec C7). Listener
    /// tokens are drawn from the top of the `usize` space, disjoint from
    /// `Conn` slot tokens (which grow from 0) and the callback queue's
    /// sentinel (`usize::MAX`).
    pub fn register_acceptor(&mut self, acceptor: Arc<Acceptor>) -> std::io::Result<Token> {
        let token = Token(usize::MAX - 1 - self.next_listener_token);
        self.next_listener_token += 1;
        acceptor
            .listener()
            .add(&self.epoll, token, Ready::readable(), EpollOpt::edge())?;
        self.listeners.insert(token, acceptor);
        Ok(token)
    }

    /// A thread-safe handle producers on other threads can use to enqueue
    /// callbacks without touching the loop directly.
    pub fn callback_sender(&self) -> crate::reactor::Queue<Callback> {
        self.callbacks.clone()
    }

    pub fn get_conn(&self, id: ConnId) -> Option<&Conn> {
        let conn = self.conns.get(id.slot as usize)?;
        (conn.id == id).then_some(conn)
    }

    pub fn get_conn_mut(&mut self, id: ConnId) -> Option<&mut Conn> {
        let generation_matches = self
            .conns
            .get(id.slot as usize)
            .map(|c| c.id == id)
            .unwrap_or(false);
        if !generation_matches {
            return None;
        }
        self.conns.get_mut(id.slot as usize)
    }

    /// Inserts a freshly created `Conn` into the arena and registers it
    /// with this loop's poller (spec C5 `register`).
    pub fn insert_conn(
        &mut self,
        build: impl FnOnce(ConnId) -> Conn,
        interest: Ready,
    ) -> std::io::Result<ConnId> {
        let slot = self.conns.vacant_key();
        while self.generations.len() <= slot {
            self.generations.push(0);
        }
        let id = ConnId {
            slot: slot as u32,
            generation: self.generations[slot],
        };
        let conn = build(id);
        let token = Token(slot);
        conn.socket.add(&self.epoll, token, interest, EpollOpt::edge())?;
        self.conns.insert(conn);
        Ok(id)
    }

    pub fn modify(&mut self, id: ConnId, interest: Ready) -> std::io::Result<()> {
        let conn = self
            .get_conn(id)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "stale Conn id"))?;
        conn.socket.modify(&self.epoll, Token(id.slot as usize), interest, EpollOpt::edge())
    }

    /// Removes a `Conn` from the arena, unregistering it from the poller
    /// first. Does not shut down the socket explicitly — dropping it closes
    /// the fd (spec §8 invariant 2: closed exactly once).
    pub fn unregister(&mut self, id: ConnId) -> Option<Conn> {
        let conn = self.get_conn(id)?;
        if let Err(e) = conn.socket.delete(&self.epoll) {
            warn!("failed to unregister conn {:?} from epoll: {}", id, e);
        }
        self.clear_all_timeouts(id);
        let conn = self.conns.remove(id.slot as usize);
        self.generations[id.slot as usize] = self.generations[id.slot as usize].wrapping_add(1);
        Some(conn)
    }

    /// Thread-safe enqueue; runs on this loop's thread at the next
    /// iteration (spec C5 `add_callback`).
    pub fn add_callback(&self, f: impl FnOnce(&mut EventLoop) + Send + 'static) {
        if self.callbacks.push(Box::new(f)).is_err() {
            error!("event loop callback queue closed, dropping callback");
        }
    }

    /// Arms one of a Conn's three deadlines (spec C5 `schedule_timeout`).
    pub fn schedule_timeout(&mut self, id: ConnId, kind: DeadlineKind, after: Duration) {
        self.clear_timeout(id, kind);
        let at = Instant::now() + after;
        let handle = self.timer.insert(at, (id, kind));
        self.timer_handles.insert((id, kind), handle);
        if let Some(conn) = self.get_conn_mut(id) {
            conn.deadlines.set(kind, at);
        }
    }

    pub fn clear_timeout(&mut self, id: ConnId, kind: DeadlineKind) {
        if let Some(handle) = self.timer_handles.remove(&(id, kind)) {
            self.timer.remove(handle);
        }
        if let Some(conn) = self.get_conn_mut(id) {
            conn.deadlines.clear(kind);
        }
    }

    fn clear_all_timeouts(&mut self, id: ConnId) {
        for kind in [DeadlineKind::Connect, DeadlineKind::Read, DeadlineKind::Write] {
            if let Some(handle) = self.timer_handles.remove(&(id, kind)) {
                self.timer.remove(handle);
            }
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn run_forever(&mut self) -> Result<(), ServiceError> {
        self.running = true;
        while self.running {
            self.run_once(MAX_POLL_WAIT)?;
        }
        Ok(())
    }

    /// One loop iteration, in the normative order from spec §4.1.
    pub fn run_once(&mut self, max_wait: Duration) -> Result<(), ServiceError> {
        let self_ptr: *mut EventLoop = self;
        CURRENT_LOOP.with(|cell| cell.set(self_ptr));
        let result = self.run_once_inner(max_wait);
        CURRENT_LOOP.with(|cell| cell.set(std::ptr::null_mut()));
        result
    }

    fn run_once_inner(&mut self, max_wait: Duration) -> Result<(), ServiceError> {
        // Step 1: drain cross-thread callbacks, bounded.
        for _ in 0..CALLBACK_BATCH {
            match self.callbacks.pop() {
                Ok(cb) => cb(self),
                Err(_) => break,
            }
        }

        // Step 2: poll readiness, waiting at most until the next deadline.
        let now = Instant::now();
        let wait = self
            .timer
            .next_deadline(now)
            .map(|d| d.min(max_wait))
            .unwrap_or(max_wait);

        match self.epoll.wait(&mut self.events, Some(wait)) {
            Ok(_) => {}
            Err(e) => {
                error!("epoll_wait failed: {}", e);
                return Err(ServiceError::Io(e));
            }
        }

        // Step 3: dispatch one readiness event per ready Conn.
        let ready: Vec<_> = self.events.iter().collect();
        for event in ready {
            let token = event.token();
            if token == self.callback_token {
                continue;
            }
            if let Some(acceptor) = self.listeners.get(&token).cloned() {
                acceptor.accept_all(self);
                continue;
            }
            let slot = token.0;
            let id = match self.conns.get(slot) {
                Some(conn) => conn.id,
                None => continue,
            };
            self.dispatch_readiness(id, event.readiness());
        }

        // Fiber scheduling happens at the end of step 3 per spec §4.1.
        crate::fiber::run_runnable();

        // Step 4: expire deadlines.
        let now = Instant::now();
        let fired = self.timer.expired(now);
        let handler = self.handler.clone();
        for (id, kind) in fired {
            self.timer_handles.remove(&(id, kind));
            handler.on_timeout(self, id, kind);
        }
        crate::fiber::run_runnable();

        Ok(())
    }

    fn dispatch_readiness(&mut self, id: ConnId, ready: Ready) {
        let handler = self.handler.clone();
        if ready.is_error() || ready.is_hup() {
            handler.on_error(self, id, ReadinessKind::Error);
            return;
        }
        if ready.is_readable() {
            handler.on_read(self, id);
        }
        if ready.is_writable() {
            handler.on_write(self, id);
        }
    }
}
