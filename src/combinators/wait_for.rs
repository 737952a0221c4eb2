//! Races a child task against a timeout.
//!
//! Grounded on `async_waiter`/`async_waiter_cancel`/`async_wait_for`. The
//! child is scheduled lazily, on the waiter's first step (or, if the
//! waiter itself is cancelled before ever stepping, from the cancellation
//! callback) — never eagerly at construction, unlike [`crate::gather`].

use std::time::{Duration, Instant};

use crate::clock;
use crate::error::ErrorKind;
use crate::event_loop::get_event_loop;
use crate::task::{Body, Continuation, TaskRef};

struct Waiter {
    /// `None` once the race has been resolved and the single matching
    /// decref has already been issued, either here or from the
    /// cancellation callback.
    child: Option<TaskRef>,
    deadline: Instant,
    scheduled: bool,
}

impl Body for Waiter {
    fn step(&mut self, task: &TaskRef) -> Continuation {
        let Some(child) = self.child.clone() else {
            return Continuation::Done;
        };
        if !self.scheduled {
            if get_event_loop().add_task(child.clone()).is_err() {
                task.set_err(ErrorKind::ENoMem);
                child.decref();
                self.child = None;
                return Continuation::Done;
            }
            self.scheduled = true;
        }
        if child.done() {
            child.decref();
            self.child = None;
            return Continuation::Done;
        }
        if clock::now() >= self.deadline {
            task.set_err(ErrorKind::ECanceled);
            child.cancel();
            child.decref();
            self.child = None;
            return Continuation::Done;
        }
        Continuation::Yielded
    }
}

/// Wraps `child` so that, if it has not completed within `timeout`, it is
/// cancelled and the returned task finishes with [`ErrorKind::ECanceled`].
///
/// Takes a logical reference on `child` for the duration of the race,
/// released exactly once regardless of which way the race resolves.
#[must_use]
pub fn wait_for(child: TaskRef, timeout: Duration) -> TaskRef {
    child.incref();
    let child_for_cancel = child.clone();
    let task = TaskRef::new(Waiter {
        child: Some(child),
        deadline: clock::deadline_after(timeout),
        scheduled: false,
    });
    task.on_cancel(move |_| {
        // Best-effort: ensure the child is in a table so the loop can
        // reap it. A failure here is unreachable on a hosted target and
        // has no return path for this callback to report through anyway.
        let _ = get_event_loop().add_task(child_for_cancel.clone());
        if !child_for_cancel.done() {
            child_for_cancel.cancel();
        }
        child_for_cancel.decref();
    });
    task
}
