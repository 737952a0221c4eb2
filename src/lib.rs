//! A minimal cooperative coroutine runtime for single-threaded,
//! event-driven programs.
//!
//! The pieces, leaves-first: a growable [`array`] used by the task table,
//! the [`task`] state object every coroutine is built from, an [`event_loop`]
//! that drives a table of tasks to completion, and a small [`combinators`]
//! library (`sleep`, `wait_for`, `gather`) built on the same task
//! abstraction.
//!
//! ```
//! use std::time::Duration;
//! use async2::combinators::sleep;
//! use async2::event_loop::get_event_loop;
//!
//! let lp = get_event_loop();
//! lp.run_until_complete(&sleep(Duration::from_millis(10)));
//! ```

pub mod array;
pub mod clock;
pub mod combinators;
pub mod error;
pub mod event_loop;
pub mod task;

pub use combinators::{gather, sleep, wait_for};
pub use error::{strerror, ErrorKind};
pub use event_loop::{get_event_loop, set_event_loop, EventLoop};
pub use task::{Body, Continuation, TaskRef};
