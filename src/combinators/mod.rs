//! Ready-made task bodies built on top of the core scheduler.
//!
//! Grounded on the original's free-standing helper coroutines
//! (`async_sleep`, `async_wait_for`, `async_gather`/`async_vgather`), each
//! of which is just another [`crate::task::Body`] implementation with no
//! special-casing in the scheduler itself.

mod gather;
mod sleep;
mod wait_for;

pub use gather::gather;
pub use sleep::sleep;
pub use wait_for::wait_for;
