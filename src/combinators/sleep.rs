//! A task that completes once a duration has elapsed.
//!
//! Grounded on `async_sleeper`/`async_sleep`, which poll a `clock()`-based
//! deadline rather than blocking on any OS timer facility; this crate does
//! the same with [`std::time::Instant`].

use std::time::{Duration, Instant};

use crate::clock;
use crate::task::{Body, Continuation, TaskRef};

struct Sleeper {
    deadline: Instant,
}

impl Body for Sleeper {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        if clock::now() >= self.deadline {
            Continuation::Done
        } else {
            Continuation::Yielded
        }
    }
}

/// Yields exactly once before completing, with no clock involved at all.
/// Grounded on `async_yielder`, the body `async_sleep` substitutes in for
/// a zero delay rather than spinning up a clock-polling sleeper for a
/// sleep that is definitionally already over.
struct Yielder {
    yielded: bool,
}

impl Body for Yielder {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        if self.yielded {
            Continuation::Done
        } else {
            self.yielded = true;
            Continuation::Yielded
        }
    }
}

/// Creates a task that completes once `duration` has elapsed.
///
/// A zero duration is a special case (see [`Yielder`]): it yields exactly
/// once and then completes, rather than racing the clock against a
/// deadline that would already be in the past by the time of the first
/// step.
///
/// The returned task is not scheduled on any event loop yet: pass it to
/// [`crate::event_loop::EventLoop::add_task`], drive it directly as the
/// `main` task of [`crate::event_loop::EventLoop::run_until_complete`], or
/// wrap it with [`crate::wait_for`]/[`crate::gather`], both of which
/// schedule their children themselves.
#[must_use]
pub fn sleep(duration: Duration) -> TaskRef {
    if duration.is_zero() {
        TaskRef::new(Yielder { yielded: false })
    } else {
        TaskRef::new(Sleeper {
            deadline: clock::deadline_after(duration),
        })
    }
}
