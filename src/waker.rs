//! The continuation interceptor, realized as a per-poll [`std::task::Wake`].
//!
//! The host specification describes an ambient "where to resume" hook that
//! must be installed for the duration of a run-loop turn and restored on
//! every exit path. Rust's `Future::poll` already threads its `Waker`
//! explicitly through every call via `Context`, so there is no ambient
//! global to install or restore: the scheduler simply builds one of these
//! before every poll, and its `wake()` is the entire routing decision.

use std::sync::{Arc, Weak};
use std::task::Wake;

use crate::scheduler::SchedulerInner;
use crate::work::WorkId;

pub(crate) struct ContinuationWaker {
    scheduler: Weak<SchedulerInner>,
    work_id: WorkId,
}

impl ContinuationWaker {
    pub(crate) fn new(scheduler: Weak<SchedulerInner>, work_id: WorkId) -> Arc<Self> {
        Arc::new(Self { scheduler, work_id })
    }
}

impl Wake for ContinuationWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(inner) = self.scheduler.upgrade() {
            inner.post_continuation(self.work_id);
        }
    }
}
