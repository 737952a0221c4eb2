//! The decision tree a single event loop pass applies to each table slot.
//!
//! Grounded directly on the original's `ASYNC_LOOP_RUNNER_BLOCK_NOREFS` /
//! `ASYNC_LOOP_RUNNER_BLOCK_CANCELLED` macros (the ordinary pass) and
//! `ASYNC_LOOP_DESTRUCTOR_BLOCK_NOREFS` (the teardown pass used by
//! `destroy`). Both walk the table with an index that only advances when
//! the current slot was left untouched; reaping or splicing a slot
//! reprocesses the same index, since a splice shifts a new task into it.

use crate::error::ErrorKind;
use crate::task::TaskRef;

use super::EventLoop;

/// Runs one pass over every live slot: reap finished tasks, propagate
/// cancellation, and step whichever tasks are ready to run.
pub(super) fn run_pass(lp: &EventLoop) {
    let mut i = 0usize;
    while i < lp.table_len() {
        let Some(task) = lp.get_slot(i) else {
            i += 1;
            continue;
        };
        let mut advance = true;
        if task.refcnt() == 0 {
            reap_slot(lp, &task, i, &mut advance);
        } else if task.err() != ErrorKind::ECanceled && task.cancel_requested() {
            propagate_cancel(&task);
        } else if !task.done() && task.next().map_or(true, |child| child.done()) {
            task.step();
        }
        if advance {
            i += 1;
        }
    }
}

/// Runs the teardown pass: every task is reaped (never merely stepped),
/// cancelling first wherever needed, until the table is fully vacant.
pub(super) fn run_destructor_pass(lp: &EventLoop) {
    let mut i = 0usize;
    while i < lp.table_len() {
        let Some(task) = lp.get_slot(i) else {
            i += 1;
            continue;
        };
        let mut advance = true;
        if task.refcnt() == 0 {
            reap_slot(lp, &task, i, &mut advance);
        } else if task.err() != ErrorKind::ECanceled && task.cancel_requested() {
            propagate_cancel(&task);
        } else {
            task.cancel();
            advance = false;
        }
        if advance {
            i += 1;
        }
    }
}

fn reap_slot(lp: &EventLoop, task: &TaskRef, index: usize, advance: &mut bool) {
    task.reap();
    if lp.push_vacant(index) {
        lp.clear_slot(index);
    } else {
        // The vacant list itself failed to grow (see `EventLoop::push_vacant`'s
        // doc comment — exercised only by tests, since a hosted Vec never
        // really runs out of memory here). Fall back to physically
        // removing the slot instead of just marking it empty, and
        // reprocess the same index: a splice shifted the next task into it.
        lp.splice_out(index);
        *advance = false;
    }
}

fn propagate_cancel(task: &TaskRef) {
    if !task.done() {
        task.decref();
        if let Some(cb) = task.take_cancel_cb() {
            cb(task);
        }
    }
    if let Some(child) = task.take_next() {
        child.decref();
        child.cancel();
    }
    task.set_err(ErrorKind::ECanceled);
    task.set_done();
}
