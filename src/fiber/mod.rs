//! Stackful cooperative fibers (spec C9), bound to the `EventLoop` thread
//! that spawns them. No published stackful-coroutine crate is available
//! in this stack, so fibers are built directly on `libc`'s `ucontext_t`
//! family (`getcontext`/`makecontext`/`swapcontext`), exactly as spec §9
//! sanctions.
//!
//! A fiber never migrates between threads: `spawn`, `resume`, and
//! `yield_now` all assume they run on the owning loop's OS thread.

mod stack;

pub use stack::FiberStack;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(pub u64);

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Whether a suspended fiber resumed normally or because its bound `Conn`
/// hit a deadline (spec §4.4 cancellation).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resume {
    Normal,
    Cancelled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FiberState {
    Runnable,
    Running,
    Suspended,
    Done,
}

struct FiberSlot {
    id: FiberId,
    state: FiberState,
    stack: FiberStack,
    ctx: Box<libc::ucontext_t>,
    /// Set on the next resume to tell the fiber's `yield_now` caller how it
    /// was woken.
    resume_kind: Resume,
    /// The fiber's body, taken by `trampoline` the moment this fiber first
    /// runs. Lives on the slot itself (not a shared thread-local) so that
    /// spawning a second fiber before the first has run can't clobber it.
    entry: Option<Box<dyn FnOnce()>>,
}

thread_local! {
    /// The loop thread's own context; fibers swap back into this when they
    /// yield or finish.
    static SCHEDULER_CTX: RefCell<libc::ucontext_t> = RefCell::new(unsafe { MaybeUninit::zeroed().assume_init() });
    /// The fiber currently executing on this thread, if any.
    static CURRENT: Cell<Option<FiberId>> = const { Cell::new(None) };
    /// Fibers owned by this thread, keyed by id. Only ever touched from the
    /// owning thread, so a plain `RefCell` (not `Mutex`) suffices.
    static FIBERS: RefCell<std::collections::HashMap<FiberId, FiberSlot>> = RefCell::new(std::collections::HashMap::new());
    /// FIFO of fibers ready to run, drained once per loop iteration (spec
    /// §4.1 step 3 / §4.4 "Scheduling").
    static RUNNABLE: RefCell<VecDeque<FiberId>> = RefCell::new(VecDeque::new());
}

extern "C" fn trampoline() {
    let id = CURRENT.with(|c| c.get());
    let entry = id.and_then(|id| {
        FIBERS.with(|fibers| fibers.borrow_mut().get_mut(&id).and_then(|slot| slot.entry.take()))
    });
    if let Some(entry) = entry {
        entry();
    }

    // The fiber body returned: mark it Done and switch back to the
    // scheduler. We never swap back into this context again.
    if let Some(id) = CURRENT.with(|c| c.get()) {
        FIBERS.with(|fibers| {
            if let Some(slot) = fibers.borrow_mut().get_mut(&id) {
                slot.state = FiberState::Done;
            }
        });
    }
    switch_to_scheduler();
}

fn switch_to_scheduler() {
    SCHEDULER_CTX.with(|sched| {
        let sched_ptr = sched.as_ptr();
        // The fiber's own ctx is only used as the "from" half of the swap;
        // we never resume through it again once Done, and while Suspended
        // its storage lives in FIBERS until `resume` swaps into it.
        let id = CURRENT.with(|c| c.get());
        CURRENT.with(|c| c.set(None));
        if let Some(id) = id {
            FIBERS.with(|fibers| {
                let mut fibers = fibers.borrow_mut();
                if let Some(slot) = fibers.get_mut(&id) {
                    let from_ctx: *mut libc::ucontext_t = &mut *slot.ctx;
                    drop(fibers);
                    unsafe {
                        libc::swapcontext(from_ctx, sched_ptr);
                    }
                    return;
                }
            });
        }
    });
}

/// Creates a Runnable fiber running `body` and enqueues it on this
/// thread's runnable queue (spec §4.4 `spawn`).
pub fn spawn<F>(body: F) -> std::io::Result<FiberId>
where
    F: FnOnce() + 'static,
{
    spawn_with_stack(body, DEFAULT_STACK_SIZE)
}

pub fn spawn_with_stack<F>(body: F, stack_size: usize) -> std::io::Result<FiberId>
where
    F: FnOnce() + 'static,
{
    let stack = FiberStack::new(stack_size)?;
    let id = FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed));

    let mut ctx: Box<libc::ucontext_t> = Box::new(unsafe { MaybeUninit::zeroed().assume_init() });
    unsafe {
        libc::getcontext(&mut *ctx);
    }
    ctx.uc_stack.ss_sp = unsafe { stack.top().sub(stack.usable_len()) } as *mut libc::c_void;
    ctx.uc_stack.ss_size = stack.usable_len();
    ctx.uc_link = std::ptr::null_mut();

    unsafe {
        libc::makecontext(&mut *ctx, trampoline, 0);
    }

    let slot = FiberSlot {
        id,
        state: FiberState::Runnable,
        stack,
        ctx,
        resume_kind: Resume::Normal,
        entry: Some(Box::new(body)),
    };

    FIBERS.with(|fibers| fibers.borrow_mut().insert(id, slot));
    RUNNABLE.with(|q| q.borrow_mut().push_back(id));

    Ok(id)
}

/// Suspends the currently running fiber until [`resume`] is called for it.
/// Returns whether the resume was a normal wakeup or a cancellation.
///
/// # Panics
/// Panics if called outside a fiber context — that's a programming error,
/// not a runtime condition callers need to recover from.
pub fn yield_now() -> Resume {
    let id = current().expect("yield_now called outside a fiber");

    FIBERS.with(|fibers| {
        if let Some(slot) = fibers.borrow_mut().get_mut(&id) {
            slot.state = FiberState::Suspended;
        }
    });

    switch_to_scheduler();

    // We're back: read how we were resumed.
    FIBERS.with(|fibers| {
        fibers
            .borrow()
            .get(&id)
            .map(|slot| slot.resume_kind)
            .unwrap_or(Resume::Cancelled)
    })
}

/// Marks `id` Runnable and pushes it to the end of the runnable queue;
/// must be called from the owning loop thread (spec §4.4 `resume`).
pub fn mark_runnable(id: FiberId, kind: Resume) {
    FIBERS.with(|fibers| {
        if let Some(slot) = fibers.borrow_mut().get_mut(&id) {
            if slot.state == FiberState::Suspended {
                slot.state = FiberState::Runnable;
                slot.resume_kind = kind;
                RUNNABLE.with(|q| q.borrow_mut().push_back(id));
            }
        }
    });
}

pub fn current() -> Option<FiberId> {
    CURRENT.with(|c| c.get())
}

/// Drains the runnable queue, running each fiber until it yields or
/// completes (spec §4.1 step 3 / §4.4 "Scheduling"). Returns the number of
/// fibers run this pass.
pub fn run_runnable() -> usize {
    let batch: Vec<FiberId> = RUNNABLE.with(|q| q.borrow_mut().drain(..).collect());
    let mut ran = 0;

    for id in batch {
        let should_run = FIBERS.with(|fibers| {
            fibers
                .borrow()
                .get(&id)
                .map(|slot| slot.state == FiberState::Runnable)
                .unwrap_or(false)
        });
        if !should_run {
            continue;
        }

        CURRENT.with(|c| c.set(Some(id)));
        FIBERS.with(|fibers| {
            if let Some(slot) = fibers.borrow_mut().get_mut(&id) {
                slot.state = FiberState::Running;
            }
        });

        SCHEDULER_CTX.with(|sched| {
            let sched_ptr = sched.as_ptr();
            FIBERS.with(|fibers| {
                let mut fibers = fibers.borrow_mut();
                if let Some(slot) = fibers.get_mut(&id) {
                    let target: *mut libc::ucontext_t = &mut *slot.ctx;
                    drop(fibers);
                    unsafe {
                        libc::swapcontext(sched_ptr, target);
                    }
                }
            });
        });

        ran += 1;
        CURRENT.with(|c| c.set(None));

        let done = FIBERS.with(|fibers| {
            fibers
                .borrow()
                .get(&id)
                .map(|slot| slot.state == FiberState::Done)
                .unwrap_or(true)
        });
        if done {
            FIBERS.with(|fibers| {
                fibers.borrow_mut().remove(&id);
            });
        }
    }

    ran
}

/// Forces a suspended fiber's next resume to observe cancellation; used by
/// the `EventLoop` when a bound `Conn`'s deadline expires (spec §4.4).
pub fn cancel(id: FiberId) {
    mark_runnable(id, Resume::Cancelled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Two fibers spawned back to back, neither run yet, must each execute
    /// their own body when `run_runnable` finally drains the queue — the
    /// second `spawn` must not clobber the first fiber's entry closure.
    #[test]
    fn two_fibers_spawned_before_running_keep_distinct_bodies() {
        let ran: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        let ran1 = ran.clone();
        spawn(move || ran1.borrow_mut().push(1)).unwrap();
        let ran2 = ran.clone();
        spawn(move || ran2.borrow_mut().push(2)).unwrap();

        let count = run_runnable();

        assert_eq!(count, 2);
        assert_eq!(*ran.borrow(), vec![1, 2]);
    }
}
