//! Property tests over the public API, covering the table/cancellation/
//! allocation invariants that `src/event_loop/scheduler.rs`'s unit tests
//! don't already exercise (those cover reap-at-zero-refcnt directly against
//! the private table; these go through `EventLoop`/`TaskRef` alone).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async2::error::ErrorKind;
use async2::event_loop::{set_event_loop, EventLoop};
use async2::task::{Body, Continuation, TaskRef};
use proptest::prelude::*;
use sequential_test::sequential;

fn fresh_loop() -> Rc<EventLoop> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let lp = Rc::new(EventLoop::new());
    set_event_loop(lp.clone());
    lp
}

struct CountSteps(Rc<Cell<u32>>, u32);
impl Body for CountSteps {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        let n = self.0.get() + 1;
        self.0.set(n);
        if n >= self.1 {
            Continuation::Done
        } else {
            Continuation::Yielded
        }
    }
}

proptest! {
    /// A task nobody ever decrefs below 1 is stepped at least once per
    /// pass until it reports `Done`, and is stepped exactly as many times
    /// as its body demands. Reaping a task before its first step is only
    /// possible when its refcnt reaches zero before the scheduler ever
    /// visits its slot, which none of these do.
    #[test]
    #[sequential]
    fn live_task_is_stepped_until_done(steps_needed in 1u32..12) {
        let lp = fresh_loop();
        let count = Rc::new(Cell::new(0u32));
        let t = TaskRef::new(CountSteps(count.clone(), steps_needed));
        lp.add_task(t.clone()).unwrap();
        lp.run_forever();
        prop_assert!(t.done());
        prop_assert_eq!(count.get(), steps_needed);
        lp.destroy();
    }
}

struct NeverFinishes;
impl Body for NeverFinishes {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        Continuation::Yielded
    }
}

proptest! {
    /// After `destroy`, every task that was ever scheduled has had its
    /// cancel callback invoked exactly once, and the loop holds none of
    /// them any longer (a second `destroy` is a no-op with nothing left to
    /// reclaim).
    #[test]
    #[sequential]
    fn destroy_runs_every_cancel_callback_exactly_once(count in 1usize..16) {
        let lp = fresh_loop();
        let mut calls: Vec<Rc<Cell<u32>>> = Vec::new();
        for _ in 0..count {
            let t = TaskRef::new(NeverFinishes);
            let n = Rc::new(Cell::new(0u32));
            let n2 = n.clone();
            t.on_cancel(move |_| n2.set(n2.get() + 1));
            lp.add_task(t).unwrap();
            calls.push(n);
        }
        lp.destroy();
        for n in &calls {
            prop_assert_eq!(n.get(), 1);
        }
        lp.destroy();
        for n in &calls {
            prop_assert_eq!(n.get(), 1);
        }
    }
}

/// Awaits a single child via `next`, matching the convention every real
/// combinator follows: incref before handing the child to `set_next`,
/// decref on whichever path observes the child finish.
struct Awaiter {
    child: TaskRef,
    started: bool,
}
impl Body for Awaiter {
    fn step(&mut self, task: &TaskRef) -> Continuation {
        if !self.started {
            self.child.incref();
            task.set_next(Some(self.child.clone()));
            self.started = true;
        }
        if self.child.done() {
            self.child.decref();
            Continuation::Done
        } else {
            Continuation::Yielded
        }
    }
}

proptest! {
    /// Cancelling the head of an await chain of depth `k` propagates
    /// `ECanceled` to every link within `k + 1` passes.
    #[test]
    #[sequential]
    fn cancel_propagates_through_await_chain_of_any_depth(depth in 1usize..8) {
        let lp = fresh_loop();
        let mut chain = vec![TaskRef::new(NeverFinishes)];
        lp.add_task(chain[0].clone()).unwrap();
        for _ in 0..depth {
            let child = chain.last().unwrap().clone();
            let parent = TaskRef::new(Awaiter { child, started: false });
            lp.add_task(parent.clone()).unwrap();
            chain.push(parent);
        }
        // Prime every `next` pointer by stepping each link once, innermost
        // first, the same priming the combinators get for free from being
        // stepped in scheduling order.
        for t in chain.iter().skip(1) {
            t.step();
        }
        chain.last().unwrap().cancel();
        // A single `run_forever` call already drains the whole table: its
        // own pass loop keeps going until every slot is empty, which
        // happens once the cascade has reached every link.
        lp.run_forever();
        for t in &chain[1..] {
            prop_assert_eq!(t.err(), ErrorKind::ECanceled);
        }
        lp.destroy();
    }
}

struct Tracker(Rc<RefCell<Vec<u32>>>, u32);
impl Drop for Tracker {
    fn drop(&mut self) {
        self.0.borrow_mut().push(self.1);
    }
}

proptest! {
    /// Every `free_later` block attached to a task is dropped exactly
    /// once, in reverse insertion order, when the task is reaped —
    /// regardless of how many blocks were attached.
    #[test]
    #[sequential]
    fn alloc_blocks_free_lifo_exactly_once(n in 1u32..20) {
        let lp = fresh_loop();
        let order = Rc::new(RefCell::new(Vec::new()));
        let t = TaskRef::new(NeverFinishes);
        for i in 0..n {
            t.free_later(Tracker(order.clone(), i));
        }
        lp.add_task(t).unwrap();
        lp.destroy();
        let got = order.borrow().clone();
        let expected: Vec<u32> = (0..n).rev().collect();
        prop_assert_eq!(got, expected);
    }
}

struct Immediate;
impl Body for Immediate {
    fn step(&mut self, _task: &TaskRef) -> Continuation {
        Continuation::Done
    }
}

proptest! {
    /// `gather` over a batch that all complete on their own is done, with
    /// `err == Ok`, only once every member has.
    #[test]
    #[sequential]
    fn gather_of_immediately_done_members_completes_ok(n in 1usize..10) {
        let lp = fresh_loop();
        let members: Vec<TaskRef> = (0..n).map(|_| TaskRef::new(Immediate)).collect();
        let g = async2::gather(members).unwrap();
        lp.add_task(g.clone()).unwrap();
        lp.run_forever();
        prop_assert!(g.done());
        prop_assert_eq!(g.err(), ErrorKind::Ok);
        lp.destroy();
    }

    /// `gather` over a batch that never finishes on their own only becomes
    /// done once cancelled, and cancellation reaches every member.
    #[test]
    #[sequential]
    fn gather_cancel_reaches_every_unfinished_member(n in 1usize..10) {
        let lp = fresh_loop();
        let members: Vec<TaskRef> = (0..n).map(|_| TaskRef::new(NeverFinishes)).collect();
        let handles = members.clone();
        let g = async2::gather(members).unwrap();
        lp.add_task(g.clone()).unwrap();
        g.cancel();
        lp.run_forever();
        prop_assert!(g.done());
        for h in &handles {
            prop_assert!(h.done());
            prop_assert_eq!(h.err(), ErrorKind::ECanceled);
        }
        lp.destroy();
    }
}
