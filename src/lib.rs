//! A per-instance, serialized-by-default asynchronous work scheduler.
//!
//! Each [`Scheduler`] runs at most one synchronous region of work at a time:
//! submitted actions and async functions are interleaved only at the yield
//! points their own futures choose, never preemptively. On top of that base
//! serialization this crate layers three coordination primitives:
//!
//! - **Atomic windows** (`SubmitOptions::ATOMIC`) -- a work item that runs
//!   with no other submission interleaved until it completes, by swapping the
//!   active queue out from under new arrivals for the window's duration.
//! - **Barriers** ([`Scheduler::set_barrier`]) -- a point that partitions
//!   earlier submissions from later ones; everything submitted before a
//!   barrier, including every resumption of in-flight async work, finishes
//!   before anything submitted after it gets its first turn.
//! - **Rendezvous** (a `sync` descriptor on `invoke_action`/`invoke_async`)
//!   -- cross-scheduler handshakes that pause every named scheduler for the
//!   duration of one scheduler's protected work, without any scheduler ever
//!   taking another's internal lock.
//!
//! All public types are `Send + Sync` and intended for use from inside a
//! multi-threaded Tokio runtime; see [`Scheduler`] for the full surface.

mod error;
mod rendezvous;
mod scheduler;
mod waker;
mod work;

pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
pub use work::{BoxFuture, Outcome, SubmitOptions};

pub use tokio_util::sync::CancellationToken;
