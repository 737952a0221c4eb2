//! The task object: the unit the event loop schedules.
//!
//! Grounded on the teacher's `task_manager/task.rs`, which keeps a plain
//! `#[repr(C)]` struct of function pointers the manager steps directly.
//! Here the "function pointer" becomes a [`Body`] trait object, and the
//! manager-owned bookkeeping fields (`cont`, `flags`, `err`, `refcnt`,
//! `cancel_cb`, `next`, `allocs`) live on [`TaskInner`] behind an [`Rc`] so a
//! task handle can be cloned and held by both the event loop's table and by
//! combinators that await one task from another.
//!
//! A task's *logical* reference count (the `refcnt` the scheduler inspects
//! to decide when to reap a slot) is tracked independently of `Rc`'s own
//! strong count. They move in lockstep — every [`TaskRef::incref`] pairs
//! with a real `Rc` clone held somewhere, and every [`TaskRef::decref`]
//! pairs with that clone being dropped — but they are not the same counter:
//! the table itself holds a clone without ever calling `incref`, since the
//! table's slot is not a "waiter" in the protocol's sense.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorKind;

/// The result of stepping a task's body once.
///
/// Replaces the C state machine's `ASYNC_INIT`/`ASYNC_CONT`/`ASYNC_DONE`
/// markers left behind in `state->_async_k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// The body has not yet run to its first yield point.
    Init,
    /// The body yielded control and wants to be stepped again later.
    Yielded,
    /// The body ran to completion; it will not be stepped again.
    Done,
}

/// A coroutine body: one step of work, resumed from wherever it last
/// yielded.
///
/// Implementors typically hold their resume point and locals as fields and
/// match over them the way a hand-written state machine would; `async`/
/// `await`-desugared generators are deliberately out of scope (see
/// `SPEC_FULL.md`'s Non-goals) so this trait is the whole story.
pub trait Body {
    /// Advances the body by one step.
    ///
    /// `task` is the handle for the task this body belongs to, passed back
    /// in so the body can inspect or mutate its own task state (e.g. set an
    /// error, spawn and await a child) without capturing a self-reference.
    fn step(&mut self, task: &TaskRef) -> Continuation;
}

bitflags_lite! {
    /// Bits private to the scheduler; presently only one is defined.
    struct Flags: u8 {
        /// Set while the task occupies a slot in some event loop's table.
        const SCHEDULED = 1 << 0;
    }
}

/// A tiny hand-rolled bitset, standing in for the `bitflags` crate (not
/// part of the teacher's dependency stack) for the single scheduled bit the
/// runtime needs.
mod bitflags_lite {
    macro_rules! bitflags_lite {
        (
            $(#[$meta:meta])*
            struct $name:ident: $ty:ty {
                $(#[$bmeta:meta])*
                const $bname:ident = $bval:expr;
            }
        ) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub(crate) struct $name($ty);

            impl $name {
                $(#[$bmeta])*
                pub(crate) const $bname: $name = $name($bval);

                pub(crate) fn contains(self, other: $name) -> bool {
                    self.0 & other.0 == other.0
                }

                pub(crate) fn insert(&mut self, other: $name) {
                    self.0 |= other.0;
                }

                pub(crate) fn remove(&mut self, other: $name) {
                    self.0 &= !other.0;
                }
            }
        };
    }
    pub(crate) use bitflags_lite;
}
use bitflags_lite::bitflags_lite;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct TaskInner {
    id: u64,
    body: RefCell<Box<dyn Body>>,
    cont: Cell<Continuation>,
    flags: Cell<Flags>,
    err: Cell<ErrorKind>,
    /// Logical reference count; see the module docs for how this relates
    /// to `Rc`'s own strong count.
    refcnt: Cell<usize>,
    cancel_requested: Cell<bool>,
    cancel_cb: RefCell<Option<Box<dyn FnOnce(&TaskRef)>>>,
    /// The child task this task is currently awaiting, if any.
    next: RefCell<Option<TaskRef>>,
    /// Values allocated on behalf of this task, freed in LIFO order when
    /// the task is reaped.
    allocs: RefCell<Vec<Box<dyn Any>>>,
}

/// A handle to a task.
///
/// Cheap to clone (an `Rc` bump); two clones referring to the same
/// underlying task compare equal.
#[derive(Clone)]
pub struct TaskRef(Rc<TaskInner>);

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("id", &self.0.id)
            .field("cont", &self.0.cont.get())
            .field("err", &self.0.err.get())
            .field("refcnt", &self.0.refcnt.get())
            .finish()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TaskRef {}

impl TaskRef {
    /// Wraps `body` into a new, unscheduled task with a fresh id.
    ///
    /// The task starts with `refcnt` 1: the caller's own handle counts as
    /// the first reference, matching `async_new_coro_`'s initial `refcnt =
    /// 1` before it is ever handed to `async_create_task`.
    #[must_use]
    pub fn new(body: impl Body + 'static) -> Self {
        let inner = TaskInner {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            body: RefCell::new(Box::new(body)),
            cont: Cell::new(Continuation::Init),
            flags: Cell::new(Flags::default()),
            err: Cell::new(ErrorKind::Ok),
            refcnt: Cell::new(1),
            cancel_requested: Cell::new(false),
            cancel_cb: RefCell::new(None),
            next: RefCell::new(None),
            allocs: RefCell::new(Vec::new()),
        };
        tracing::trace!(task.id = inner.id, "task created");
        Self(Rc::new(inner))
    }

    /// The task's id, stable for its whole lifetime. Used only for tracing
    /// and debugging; the runtime never looks tasks up by id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// `true` once the body has run to completion.
    #[must_use]
    pub fn done(&self) -> bool {
        self.0.cont.get() == Continuation::Done
    }

    /// The last error observed, or [`ErrorKind::Ok`].
    #[must_use]
    pub fn err(&self) -> ErrorKind {
        self.0.err.get()
    }

    /// Sets the task's error, unless one is already set — once non-`Ok` it
    /// is sticky for the remainder of the task's life.
    pub fn set_err(&self, kind: ErrorKind) {
        if self.0.err.get() == ErrorKind::Ok {
            self.0.err.set(kind);
        }
    }

    /// The task's current logical reference count.
    #[must_use]
    pub fn refcnt(&self) -> usize {
        self.0.refcnt.get()
    }

    /// Increments the logical reference count. Callers that do this must
    /// hold (or create) a matching `TaskRef` clone so Rust's own memory
    /// reclamation does not run ahead of the protocol's bookkeeping.
    pub fn incref(&self) {
        self.0.refcnt.set(self.0.refcnt.get() + 1);
    }

    /// Decrements the logical reference count.
    ///
    /// Saturates at zero rather than panicking on an unbalanced decref:
    /// mirrors the original's unchecked `refcnt--`, but a refcnt that was
    /// already zero means a caller double-released, which is an internal
    /// bug worth flagging in debug builds.
    pub fn decref(&self) {
        let cur = self.0.refcnt.get();
        debug_assert!(cur > 0, "decref on task {} with refcnt already 0", self.0.id);
        self.0.refcnt.set(cur.saturating_sub(1));
    }

    /// `true` if cancellation has been requested, regardless of whether it
    /// has been processed yet.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.0.cancel_requested.get()
    }

    /// Requests cancellation. Idempotent: a second call on an
    /// already-cancelled task is a no-op.
    pub fn cancel(&self) {
        if !self.0.cancel_requested.replace(true) {
            tracing::trace!(task.id = self.0.id, "cancellation requested");
        }
    }

    /// Registers a callback to run exactly once, the first time the
    /// scheduler observes this task to be both cancelled and not yet done.
    /// Replaces any previously registered callback.
    pub fn on_cancel(&self, cb: impl FnOnce(&TaskRef) + 'static) {
        *self.0.cancel_cb.borrow_mut() = Some(Box::new(cb));
    }

    pub(crate) fn take_cancel_cb(&self) -> Option<Box<dyn FnOnce(&TaskRef)>> {
        self.0.cancel_cb.borrow_mut().take()
    }

    /// The child task currently being awaited, if any.
    #[must_use]
    pub fn next(&self) -> Option<TaskRef> {
        self.0.next.borrow().clone()
    }

    /// Sets the child task currently being awaited.
    pub fn set_next(&self, next: Option<TaskRef>) {
        *self.0.next.borrow_mut() = next;
    }

    pub(crate) fn take_next(&self) -> Option<TaskRef> {
        self.0.next.borrow_mut().take()
    }

    /// `true` while this task occupies a slot in some event loop's table.
    #[must_use]
    pub fn scheduled(&self) -> bool {
        self.0.flags.get().contains(Flags::SCHEDULED)
    }

    pub(crate) fn set_scheduled(&self, scheduled: bool) {
        let mut flags = self.0.flags.get();
        if scheduled {
            flags.insert(Flags::SCHEDULED);
        } else {
            flags.remove(Flags::SCHEDULED);
        }
        self.0.flags.set(flags);
    }

    /// Steps the body once, recording the resulting continuation state.
    ///
    /// No-op (returns the existing state) once the task is done, so callers
    /// never need to guard a `step()` call behind `!done()` themselves,
    /// though the scheduler does so anyway to avoid the tracing noise.
    pub fn step(&self) -> Continuation {
        if self.done() {
            return Continuation::Done;
        }
        let result = self.0.body.borrow_mut().step(self);
        self.0.cont.set(result);
        if result == Continuation::Done {
            tracing::trace!(task.id = self.0.id, "task completed");
        }
        result
    }

    /// Marks the task done without stepping its body again. Used by the
    /// scheduler when finishing off a cancellation: the original sets
    /// `_async_k = ASYNC_DONE` directly rather than invoking the body once
    /// more, so a cancelled body never observes its own cancellation.
    pub(crate) fn set_done(&self) {
        self.0.cont.set(Continuation::Done);
    }

    /// Moves `value` into the task's allocation arena, returning a handle
    /// that can be used to free it early with [`TaskRef::free_on`].
    /// Otherwise it is dropped, LIFO, when the task is reaped.
    pub fn alloc_on<T: 'static>(&self, value: T) -> AllocHandle {
        let mut allocs = self.0.allocs.borrow_mut();
        let index = allocs.len();
        allocs.push(Box::new(value));
        AllocHandle { index }
    }

    /// Same as [`TaskRef::alloc_on`] but without returning a handle, for
    /// values the caller never needs to free early.
    pub fn free_later<T: 'static>(&self, value: T) {
        self.0.allocs.borrow_mut().push(Box::new(value));
    }

    /// Frees a value early, out of LIFO order, leaving a vacated arena
    /// slot behind. Returns `false` if `handle` was already freed.
    pub fn free_on(&self, handle: AllocHandle) -> bool {
        let mut allocs = self.0.allocs.borrow_mut();
        if handle.index < allocs.len() {
            // Swap in a zero-sized placeholder so later indices stay valid.
            allocs[handle.index] = Box::new(());
            true
        } else {
            false
        }
    }

    /// Invoked by the scheduler when a task's refcnt reaches zero: runs the
    /// cancellation callback if the task never got a chance to finish, then
    /// drops every arena allocation in LIFO order.
    pub(crate) fn reap(&self) {
        if !self.done() {
            if let Some(cb) = self.take_cancel_cb() {
                cb(self);
            }
        }
        let mut allocs = self.0.allocs.borrow_mut();
        while let Some(value) = allocs.pop() {
            drop(value);
        }
        tracing::trace!(task.id = self.0.id, "task reaped");
    }
}

/// A handle to a value previously placed with [`TaskRef::alloc_on`].
#[derive(Debug, Clone, Copy)]
pub struct AllocHandle {
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Once(bool);
    impl Body for Once {
        fn step(&mut self, _task: &TaskRef) -> Continuation {
            if self.0 {
                Continuation::Done
            } else {
                self.0 = true;
                Continuation::Yielded
            }
        }
    }

    #[test]
    fn step_transitions_init_yielded_done() {
        let t = TaskRef::new(Once(false));
        assert!(!t.done());
        assert_eq!(t.step(), Continuation::Yielded);
        assert!(!t.done());
        assert_eq!(t.step(), Continuation::Done);
        assert!(t.done());
    }

    #[test]
    fn refcnt_starts_at_one_and_tracks_in_out() {
        let t = TaskRef::new(Once(true));
        assert_eq!(t.refcnt(), 1);
        t.incref();
        assert_eq!(t.refcnt(), 2);
        t.decref();
        t.decref();
        assert_eq!(t.refcnt(), 0);
    }

    #[test]
    fn err_is_sticky() {
        let t = TaskRef::new(Once(true));
        t.set_err(ErrorKind::ENoMem);
        t.set_err(ErrorKind::EInvalState);
        assert_eq!(t.err(), ErrorKind::ENoMem);
    }

    #[test]
    fn cancel_cb_runs_exactly_once_on_reap() {
        let t = TaskRef::new(Once(false));
        let calls = Rc::new(Cell::new(0u32));
        let calls2 = calls.clone();
        t.on_cancel(move |_| calls2.set(calls2.get() + 1));
        t.reap();
        t.reap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn allocs_drop_in_lifo_order() {
        let t = TaskRef::new(Once(true));
        let order = Rc::new(RefCell::new(Vec::new()));
        struct Tracker(Rc<RefCell<Vec<u32>>>, u32);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.borrow_mut().push(self.1);
            }
        }
        t.free_later(Tracker(order.clone(), 1));
        t.free_later(Tracker(order.clone(), 2));
        t.free_later(Tracker(order.clone(), 3));
        t.reap();
        assert_eq!(*order.borrow(), vec![3, 2, 1]);
    }
}
