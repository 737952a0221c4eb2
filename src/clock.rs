//! Wall-clock access used by the timing combinators.
//!
//! The original implementation polled a hardware tick counter (see the
//! teacher's own `timer.rs`, which drives `setup_timer`/`loop_timer` off an
//! ESP32 peripheral). This crate targets a hosted environment instead, so
//! `now()` is a thin wrapper around [`std::time::Instant`]; there is no
//! readiness notification, only polling, per the runtime's Non-goals.

use std::time::{Duration, Instant};

/// Returns the current instant, per the process's monotonic clock.
#[must_use]
pub fn now() -> Instant {
    Instant::now()
}

/// The instant by which a deadline is considered elapsed.
#[must_use]
pub fn deadline_after(duration: Duration) -> Instant {
    now() + duration
}
