//! Error kinds reported by the runtime.
//!
//! The original C implementation this crate is modeled on represents errors
//! as a small integer enum (`async_error`) together with a `strerror`-style
//! lookup table. We keep the same four-variant taxonomy but let
//! [`thiserror`](https://docs.rs/thiserror) derive `Display`/`std::error::Error`
//! for us, matching the error-enum style used throughout the example
//! workspaces this crate is grounded on.

use thiserror::Error;

/// The last error observed on a task, or `Ok` if none.
///
/// Once a task's error is set to anything other than `Ok` it is never
/// cleared; see the invariants in `task::TaskInner`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorKind {
    /// No error has been observed.
    #[default]
    #[error("OK")]
    Ok,
    /// A heap allocation or table growth failed.
    #[error("MEMORY ALLOCATION ERROR")]
    ENoMem,
    /// The task observed a cancellation.
    #[error("COROUTINE WAS CANCELLED")]
    ECanceled,
    /// An invalid task (e.g. unscheduled, already reaped) was passed where a
    /// live, scheduled task was required.
    #[error("INVALID STATE WAS PASSED TO COROUTINE")]
    EInvalState,
}

impl ErrorKind {
    /// `true` for every variant other than [`ErrorKind::Ok`].
    #[must_use]
    pub fn is_err(self) -> bool {
        self != ErrorKind::Ok
    }
}

/// Returns the human-readable description of `kind`.
///
/// Equivalent to the original `async_strerror`; kept as a free function
/// alongside the `Display` impl for parity with the C API surface.
#[must_use]
pub fn strerror(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Ok => "OK",
        ErrorKind::ENoMem => "MEMORY ALLOCATION ERROR",
        ErrorKind::ECanceled => "COROUTINE WAS CANCELLED",
        ErrorKind::EInvalState => "INVALID STATE WAS PASSED TO COROUTINE",
    }
}
