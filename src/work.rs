//! Work records.
//!
//! A [`Work`] is the scheduler's single queued unit: a tagged variant
//! describing either user payload (an action or an async function) or one
//! of the scheduler's own internal markers (`Post`, `Barrier`, `Sync`).
//!
//! The host specification this crate implements distinguishes submissions by
//! arity -- `ActionNoState`/`ActionWithState`/`FuncWithState`/... -- because
//! the language it describes needs a separate overload per state-capturing
//! shape. Rust closures already capture their environment, so every one of
//! those shapes collapses into exactly two payload kinds here: [`Action`] and
//! [`AsyncFn`]. See `DESIGN.md` for this as a recorded, deliberate
//! simplification rather than a dropped feature.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::rendezvous::Rendezvous;

/// A boxed, type-erased future as produced by an async work payload.
pub type BoxFuture = Pin<Box<dyn Future<Output = std::result::Result<(), SchedulerError>> + Send>>;

/// What a completed (or cancelled, or faulted) work resolves its carried
/// promise to. This is this crate's realization of "a handle to the inner
/// task": since the scheduler itself drives every future to completion
/// rather than handing callers an independent task handle, the outcome of
/// that drive *is* the handle.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The work ran to completion without error.
    Completed,
    /// The work was dropped by `close()`, or its future observed the shared
    /// cancellation token and unwound.
    Cancelled,
    /// The work's action panicked, or its future resolved to `Err`.
    Faulted(SchedulerError),
}

/// Opaque identifier for one [`Work`], scoped to the scheduler that created
/// it. Used only to correlate a suspended future with the continuation
/// waker that will later ask for it to be re-polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkId(u64);

impl WorkId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WorkId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Submission options. Only `NORMAL` and `ATOMIC` are part of the public
/// surface; `POST`/`BARRIER`/`SYNC` are reserved bits the scheduler sets on
/// its own internal markers and never accepts from a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitOptions(u32);

impl SubmitOptions {
    /// Default: no interleaving guarantees beyond the base serialization.
    pub const NORMAL: Self = Self(0);
    /// The work's future runs with no other work interleaved until it
    /// completes. Rejected for synchronous actions.
    pub const ATOMIC: Self = Self(1 << 0);

    pub(crate) const POST: Self = Self(1 << 8);
    pub(crate) const BARRIER: Self = Self(1 << 9);
    pub(crate) const SYNC: Self = Self(1 << 10);

    pub(crate) fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for SubmitOptions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The payload carried by a [`Work`].
pub(crate) enum WorkKind {
    /// Runs synchronously to completion inline on the run loop. A panic is
    /// the only fault an action can raise; unlike `AsyncFn`, there is no
    /// `Result` to return.
    Action(Box<dyn FnOnce() + Send>),
    /// Invoked once to obtain a future; the run loop polls that future
    /// itself rather than handing it to the host runtime's own executor.
    AsyncFn(Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>),
    /// Continuation of a previously suspended async work, identified by the
    /// id it was filed under in the scheduler's in-flight table.
    Post(WorkId),
    /// Queue marker partitioning earlier from later submissions.
    Barrier,
    /// Waiter-side marker parking this scheduler on a rendezvous.
    Sync(Arc<Rendezvous>),
}

/// One queued unit of work.
pub(crate) struct Work {
    pub(crate) id: WorkId,
    pub(crate) kind: WorkKind,
    pub(crate) options: SubmitOptions,
    pub(crate) completion: Option<oneshot::Sender<Outcome>>,
    /// Present only on the owner's copy of a sync-qualified work; `None` for
    /// everything else, including the `Sync` marker the owner sends to each
    /// waiter (that marker instead holds the `Rendezvous` as its payload).
    pub(crate) sync: Option<Arc<Rendezvous>>,
}

impl Work {
    pub(crate) fn action(
        body: Box<dyn FnOnce() + Send>,
        options: SubmitOptions,
        completion: Option<oneshot::Sender<Outcome>>,
        sync: Option<Arc<Rendezvous>>,
    ) -> Self {
        Self {
            id: WorkId::next(),
            kind: WorkKind::Action(body),
            options,
            completion,
            sync,
        }
    }

    pub(crate) fn async_fn(
        body: Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>,
        options: SubmitOptions,
        completion: Option<oneshot::Sender<Outcome>>,
        sync: Option<Arc<Rendezvous>>,
    ) -> Self {
        Self {
            id: WorkId::next(),
            kind: WorkKind::AsyncFn(body),
            options,
            completion,
            sync,
        }
    }

    pub(crate) fn post(id: WorkId) -> Self {
        Self {
            id,
            kind: WorkKind::Post(id),
            options: SubmitOptions::POST,
            completion: None,
            sync: None,
        }
    }

    pub(crate) fn barrier(completion: Option<oneshot::Sender<Outcome>>) -> Self {
        Self {
            id: WorkId::next(),
            kind: WorkKind::Barrier,
            options: SubmitOptions::BARRIER,
            completion,
            sync: None,
        }
    }

    pub(crate) fn sync_marker(rendezvous: Arc<Rendezvous>) -> Self {
        Self {
            id: WorkId::next(),
            kind: WorkKind::Sync(rendezvous),
            options: SubmitOptions::SYNC,
            completion: None,
            sync: None,
        }
    }

    /// Resolve the carried promise, if any, with `outcome`. Dropping a
    /// `Sender` without sending is also a valid "nobody is listening"
    /// outcome, so callers that never attached a promise pay nothing here.
    pub(crate) fn resolve(mut self, outcome: Outcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}
