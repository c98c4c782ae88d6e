//! Cross-scheduler synchronization rendezvous.
//!
//! A [`Rendezvous`] is shared between an "owner" scheduler (the one that
//! submitted a sync-qualified work) and one or more "waiter" schedulers
//! named in the sync descriptor. It counts arrivals so the owner's
//! protected work begins only once every participant has parked itself, and
//! releases every waiter only after the protected region ends.
//!
//! Neither side ever takes the other's scheduler lock: all handshake state
//! lives in the `remaining` atomic counter, and `sync_ready`/`sync_end` are
//! invoked by whichever thread's decrement happens to observe the
//! zero-crossing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

pub(crate) struct Rendezvous {
    pub(crate) owner: Scheduler,
    pub(crate) participants: Vec<Scheduler>,
    remaining: AtomicUsize,
}

impl Rendezvous {
    pub(crate) fn new(owner: Scheduler, participants: Vec<Scheduler>) -> Arc<Self> {
        let remaining = participants.len() + 1;
        Arc::new(Self {
            owner,
            participants,
            remaining: AtomicUsize::new(remaining),
        })
    }

    /// Does `other` already appear as a participant (or the owner) of this
    /// rendezvous? Used for the direct-cycle check at submission time: if
    /// scheduler A is submitting work synced to B, and B currently owns a
    /// rendezvous that names A as a participant, the two would deadlock
    /// waiting on each other.
    pub(crate) fn names(&self, candidate: &Scheduler) -> bool {
        self.owner.is_same(candidate) || self.participants.iter().any(|p| p.is_same(candidate))
    }

    /// Called by the owner's run loop once it has parked itself on this
    /// rendezvous, about to execute the protected work.
    pub(crate) fn owner_arrived(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.sync_ready(Arc::clone(self));
        }
    }

    /// Called by a waiter's run loop once it has parked itself on this
    /// rendezvous.
    pub(crate) fn waiter_arrived(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.sync_ready(Arc::clone(self));
        }
    }

    /// Notify every participant that the protected region has ended; each
    /// waiter clears its own park and respawns its run loop if idle.
    pub(crate) fn release_waiters(self: &Arc<Self>) {
        for waiter in &self.participants {
            waiter.clear_sync_wait(self);
        }
    }
}

/// Validate a sync descriptor against the submitting scheduler: non-empty,
/// no duplicates, and does not name the submitter itself.
pub(crate) fn validate_descriptor(
    owner: &Scheduler,
    descriptor: &[&Scheduler],
) -> std::result::Result<Vec<Scheduler>, SchedulerError> {
    if descriptor.is_empty() {
        return Err(SchedulerError::Misuse(
            "sync descriptor must name at least one other scheduler",
        ));
    }
    let mut participants: Vec<Scheduler> = Vec::with_capacity(descriptor.len());
    for candidate in descriptor {
        if owner.is_same(candidate) {
            return Err(SchedulerError::Misuse(
                "sync descriptor must not include the submitting scheduler",
            ));
        }
        if participants.iter().any(|p| p.is_same(candidate)) {
            return Err(SchedulerError::Misuse(
                "sync descriptor must not contain duplicate schedulers",
            ));
        }
        participants.push((*candidate).clone());
    }
    Ok(participants)
}
