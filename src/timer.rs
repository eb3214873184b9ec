//! Deadline heap for [`crate::event_loop::EventLoop`] (spec §4.1: "a
//! min-heap (or timer wheel) of deadlines"). Completes the teacher's
//! `plus/timer.rs` `Timer`/`Task` skeleton, which declared this ordering
//! but left every method unimplemented.
//!
//! Cancellation is lazy: `remove` just records the token as cancelled, and
//! `pop`/`try_pop` skip cancelled entries as they're popped. A cancelled
//! slot still occupies heap space until its deadline would have fired, but
//! callers only ever cancel a bounded number of in-flight deadlines per
//! `Conn`, so this never accumulates unboundedly.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::hash::Hash;
use std::time::Instant;

struct Task<T> {
    at: Instant,
    seq: u64,
    token: T,
}

impl<T> PartialEq for Task<T> {
    fn eq(&self, other: &Task<T>) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Task<T> {}

impl<T> Ord for Task<T> {
    // Reversed so `BinaryHeap`, a max-heap, pops the earliest deadline
    // first; ties broken by insertion order (seq) so `pop` is stable.
    fn cmp(&self, other: &Task<T>) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Task<T> {
    fn partial_cmp(&self, other: &Task<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of `(Instant, token)` pairs. `token` is whatever the caller
/// needs to resolve a fired deadline back to state — `event_loop.rs` uses
/// `(ConnId, DeadlineKind)`.
pub struct Timer<T> {
    tasks: BinaryHeap<Task<T>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

impl<T> Timer<T> {
    pub fn new() -> Timer<T> {
        Timer {
            tasks: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Schedules `token` to fire at `at`. Returns a handle usable with
    /// [`Timer::remove`].
    pub fn insert(&mut self, at: Instant, token: T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.push(Task { at, seq, token });
        seq
    }

    /// Cancels a previously inserted deadline. No-op if it already fired.
    pub fn remove(&mut self, handle: u64) {
        self.cancelled.insert(handle);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.len() == self.cancelled.len()
    }

    /// Duration until the earliest live deadline, if any.
    pub fn next_deadline(&self, now: Instant) -> Option<std::time::Duration> {
        self.tasks
            .iter()
            .filter(|t| !self.cancelled.contains(&t.seq))
            .map(|t| t.at)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }

    /// Pops every deadline that has expired by `now`.
    pub fn expired(&mut self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(top) = self.tasks.peek() {
            if top.at > now {
                break;
            }
            let task = self.tasks.pop().expect("just peeked");
            if self.cancelled.remove(&task.seq) {
                continue;
            }
            fired.push(task.token);
        }
        fired
    }
}

impl<T> Default for Timer<T> {
    fn default() -> Timer<T> {
        Timer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pops_in_deadline_order() {
        let mut timer = Timer::new();
        let now = Instant::now();
        timer.insert(now + Duration::from_millis(20), "b");
        timer.insert(now + Duration::from_millis(10), "a");
        timer.insert(now + Duration::from_millis(30), "c");

        let fired = timer.expired(now + Duration::from_millis(25));
        assert_eq!(fired, vec!["a", "b"]);
    }

    #[test]
    fn removed_deadline_does_not_fire() {
        let mut timer = Timer::new();
        let now = Instant::now();
        let handle = timer.insert(now + Duration::from_millis(10), "a");
        timer.remove(handle);

        let fired = timer.expired(now + Duration::from_millis(20));
        assert!(fired.is_empty());
    }

    #[test]
    fn next_deadline_ignores_cancelled() {
        let mut timer: Timer<&str> = Timer::new();
        let now = Instant::now();
        let handle = timer.insert(now + Duration::from_millis(5), "a");
        timer.insert(now + Duration::from_millis(50), "b");
        timer.remove(handle);

        let next = timer.next_deadline(now).unwrap();
        assert!(next >= Duration::from_millis(49));
    }
}
