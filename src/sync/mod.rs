//! Connection-internal synchronization primitives.
//!
//! - [`Latch`] — one-shot, inspectable, multi-waiter cell; the connection
//!   done-state and the per-channel subscription confirmation.
//! - [`Slot`] — single-slot synchronous channel between the read dispatcher
//!   and the active query; the sender waits until the value is consumed,
//!   which is the read-side backpressure.
//! - [`QueryLock`] — the single turn token serializing queries, realized as
//!   a fair semaphore holding at most one permit.
mod latch;
mod lock;
mod slot;

pub(crate) use latch::Latch;
pub(crate) use lock::{QueryLock, QueryPermit};
pub(crate) use slot::Slot;
