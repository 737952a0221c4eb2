//! Waits for a whole batch of tasks to complete.
//!
//! Grounded on `async_gatherer`/`async_gatherer_cancel`/`async_gather`. Unlike
//! [`crate::wait_for`], every member task is scheduled eagerly, at
//! construction time, rather than lazily on first step.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ErrorKind;
use crate::event_loop::get_event_loop;
use crate::task::{Body, Continuation, TaskRef};

struct Gatherer {
    /// Shared with the cancellation callback so it prunes exactly the
    /// tasks this body hasn't already finished and released.
    remaining: Rc<RefCell<Vec<TaskRef>>>,
}

impl Body for Gatherer {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        let mut remaining = self.remaining.borrow_mut();
        let mut i = 0;
        while i < remaining.len() {
            if remaining[i].done() {
                let finished = remaining.remove(i);
                finished.decref();
            } else {
                i += 1;
            }
        }
        if remaining.is_empty() {
            Continuation::Done
        } else {
            Continuation::Yielded
        }
    }
}

/// Waits for every task in `tasks` to complete.
///
/// Cancelling the returned task cancels every member of `tasks` that has
/// not yet finished.
///
/// `tasks` is taken by value, matching the original's "caller relinquishes
/// the buffer" contract. Passing the same task in twice holds two logical
/// references to it without ever completing it twice, which is harmless
/// but pointless; callers should not do that.
///
/// # Errors
/// Returns [`ErrorKind::ENoMem`] if any member could not be scheduled
/// (unreachable on a hosted target; any members scheduled before the
/// failing one stay scheduled and run to completion independently, since
/// nothing downstream is left holding a reference to await them).
pub fn gather(tasks: Vec<TaskRef>) -> Result<TaskRef, ErrorKind> {
    let lp = get_event_loop();
    let tasks = lp.add_tasks(tasks)?;
    for t in &tasks {
        t.incref();
    }
    let remaining = Rc::new(RefCell::new(tasks));
    let remaining_for_cancel = remaining.clone();
    let task = TaskRef::new(Gatherer { remaining });
    task.on_cancel(move |_| {
        for child in remaining_for_cancel.borrow().iter() {
            if !child.done() {
                child.cancel();
            }
            child.decref();
        }
    });
    Ok(task)
}
