use std::time::Duration;
use std::io;

use crate::reactor::{Ready, Token};
use crate::sys::epoll;

/// One readiness notification returned from a single `Epoll::wait` call.
#[derive(Copy, Clone, Debug)]
pub struct Event {
    kind: Ready,
    token: Token,
}

impl Event {
    pub(crate) fn new(kind: Ready, token: Token) -> Event {
        Event { kind, token }
    }

    pub fn readiness(&self) -> Ready {
        self.kind
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// Storage for one `Epoll::wait` batch. Reused across iterations of the
/// event loop to avoid a per-iteration allocation.
pub struct Events {
    inner: epoll::Events,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: epoll::Events::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn get(&self, idx: usize) -> Option<Event> {
        self.inner.get(idx)
    }

    pub(crate) fn raw_mut(&mut self) -> &mut epoll::Events {
        &mut self.inner
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { events: self, pos: 0 }
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

pub struct Iter<'a> {
    events: &'a Events,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let ev = self.events.get(self.pos)?;
        self.pos += 1;
        Some(ev)
    }
}

pub struct IntoIter {
    events: Events,
    pos: usize,
}

impl Iterator for IntoIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let ev = self.events.get(self.pos)?;
        self.pos += 1;
        Some(ev)
    }
}

impl IntoIterator for Events {
    type Item = Event;
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        IntoIter { events: self, pos: 0 }
    }
}

pub(crate) fn wait(
    epoll: &epoll::Epoll,
    events: &mut Events,
    timeout: Option<Duration>,
) -> io::Result<usize> {
    epoll.wait(events.raw_mut(), timeout)?;
    Ok(events.len())
}
