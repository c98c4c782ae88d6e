//! The scheduler engine: admission, the run loop, atomic windows, barrier
//! quiescence, and cross-scheduler rendezvous participation.
//!
//! A [`Scheduler`] is cheaply cloneable (`Arc`-backed) and safe to share
//! across threads and async tasks, in the same spirit as the teacher
//! crate's own task scheduler. Unlike that scheduler, every queue and mode
//! flag here lives behind a single mutex: the invariants this crate
//! implements (atomic windows, barriers, rendezvous) span several queues at
//! once, and a lock-free per-queue design cannot make those transitions
//! atomic. See `DESIGN.md` for this as a deliberate divergence from the
//! teacher's `SegQueue`-per-lane layout.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};
use crate::rendezvous::{self, Rendezvous};
use crate::waker::ContinuationWaker;
use crate::work::{BoxFuture, Outcome, SubmitOptions, Work, WorkId, WorkKind};

/// A single instance of the serialized work executor.
///
/// Cloning a `Scheduler` is cheap (it clones an `Arc`) and yields a handle
/// to the same underlying engine -- exactly the sharing model a sync
/// descriptor needs to name "other schedulers".
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    name: String,
    state: Mutex<State>,
    running_async_count: AtomicUsize,
    cancel: CancellationToken,
    unhandled: Mutex<Option<Arc<dyn Fn(&str, &SchedulerError) + Send + Sync>>>,
    inflight: Mutex<HashMap<WorkId, InFlight>>,
}

#[derive(Default)]
struct State {
    active: VecDeque<Work>,
    pending: VecDeque<Work>,
    barrier_queue: VecDeque<Work>,
    loop_spawned: bool,
    in_atomic: bool,
    atomic_work: Option<WorkId>,
    in_barrier: bool,
    waiting_barrier: Option<Work>,
    waiting_sync: Option<Arc<Rendezvous>>,
    waiting_owned_sync: Option<Work>,
    disposed: bool,
}

struct InFlight {
    future: BoxFuture,
    completion: Option<oneshot::Sender<Outcome>>,
    options: SubmitOptions,
    sync: Option<Arc<Rendezvous>>,
}

/// What a run-loop turn leaves the loop free to do next.
enum Turn {
    /// Keep pulling from `active`.
    Continue,
    /// This scheduler parked itself on a rendezvous (as owner or waiter) in
    /// the same locked section that cleared `loop_spawned`; the loop must
    /// exit without re-acquiring the lock to check anything, since a peer
    /// thread may already be past that park and running the protected work.
    Parked,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Create a new scheduler. The run loop is not spawned until the first
    /// submission arrives.
    #[must_use]
    pub fn new() -> Self {
        Self::with_name("scheduler")
    }

    /// Create a new scheduler with a diagnostic name that shows up in every
    /// `tracing` event this instance emits.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let inner = Arc::new(SchedulerInner {
            name: name.clone(),
            state: Mutex::new(State::default()),
            running_async_count: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            unhandled: Mutex::new(None),
            inflight: Mutex::new(HashMap::new()),
        });
        tracing::debug!(scheduler = %name, "scheduler created");
        Self { inner }
    }

    /// This scheduler's diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether `other` is a handle to this same underlying scheduler.
    pub fn is_same(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The cancellation token this scheduler fans its `close()` out to.
    /// Also handed to every async work's closure so user code can observe
    /// it cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Install a fault observer. Not serialized with the run loop: it may
    /// be invoked from any thread, concurrently with the run loop or with
    /// itself.
    pub fn on_unhandled<F>(&self, handler: F)
    where
        F: Fn(&str, &SchedulerError) + Send + Sync + 'static,
    {
        *self.inner.unhandled.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Submit a synchronous action.
    pub fn invoke_action<F>(
        &self,
        action: F,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
    ) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.invoke_action_inner(Box::new(action), options, sync, false)
            .map(|_| ())
    }

    /// Submit a synchronous action, returning a promise that resolves once
    /// it has run (or been cancelled).
    pub fn invoke_action_await<F>(
        &self,
        action: F,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
    ) -> Result<oneshot::Receiver<Outcome>>
    where
        F: FnOnce() + Send + 'static,
    {
        Ok(self
            .invoke_action_inner(Box::new(action), options, sync, true)?
            .expect("promise requested"))
    }

    fn invoke_action_inner(
        &self,
        body: Box<dyn FnOnce() + Send>,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
        want_promise: bool,
    ) -> Result<Option<oneshot::Receiver<Outcome>>> {
        if options.contains(SubmitOptions::ATOMIC) {
            return Err(SchedulerError::Misuse(
                "atomic requires an asynchronous work",
            ));
        }
        let rdv = self.prepare_sync(sync)?;
        let (tx, rx) = Self::make_promise(want_promise);
        let work = Work::action(body, options, tx, rdv.clone());
        self.submit(work, rdv);
        Ok(rx)
    }

    /// Submit an asynchronous work. `body` is invoked once, synchronously,
    /// to obtain the future; the scheduler then drives that future itself
    /// rather than handing it to the host runtime's own executor.
    pub fn invoke_async<F>(
        &self,
        body: F,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
    ) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> BoxFuture + Send + 'static,
    {
        self.invoke_async_inner(Box::new(body), options, sync, false)
            .map(|_| ())
    }

    /// Submit an asynchronous work, returning a promise that resolves with
    /// its [`Outcome`].
    pub fn invoke_async_await<F>(
        &self,
        body: F,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
    ) -> Result<oneshot::Receiver<Outcome>>
    where
        F: FnOnce(CancellationToken) -> BoxFuture + Send + 'static,
    {
        Ok(self
            .invoke_async_inner(Box::new(body), options, sync, true)?
            .expect("promise requested"))
    }

    fn invoke_async_inner(
        &self,
        body: Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>,
        options: SubmitOptions,
        sync: Option<&[&Scheduler]>,
        want_promise: bool,
    ) -> Result<Option<oneshot::Receiver<Outcome>>> {
        let rdv = self.prepare_sync(sync)?;
        let (tx, rx) = Self::make_promise(want_promise);
        let work = Work::async_fn(body, options, tx, rdv.clone());
        self.submit(work, rdv);
        Ok(rx)
    }

    fn make_promise(
        want_promise: bool,
    ) -> (
        Option<oneshot::Sender<Outcome>>,
        Option<oneshot::Receiver<Outcome>>,
    ) {
        if want_promise {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        }
    }

    /// Enqueue a barrier: every submission before this call completes
    /// before any submission after it begins its first synchronous region.
    pub fn set_barrier(&self) {
        self.enqueue(Work::barrier(None));
    }

    /// Like [`Scheduler::set_barrier`], but returns a promise that resolves
    /// once the barrier has actually been consumed (i.e. once every prior
    /// work item, including all of its resumptions, has finished).
    pub fn set_barrier_await(&self) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Work::barrier(Some(tx)));
        rx
    }

    /// Idempotently close the scheduler. Queued work (other than `Post`
    /// continuations of in-flight async work, which must still run so
    /// suspended futures can observe the cancellation token) has its
    /// promise resolved as cancelled and is dropped. The shared
    /// cancellation token is triggered exactly once.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.disposed {
            return;
        }
        state.disposed = true;
        self.inner.cancel.cancel();
        tracing::info!(scheduler = %self.inner.name, "scheduler closed");

        Self::drain_cancelling(&mut state.active);
        Self::drain_cancelling(&mut state.pending);
        Self::drain_cancelling(&mut state.barrier_queue);
        if let Some(barrier) = state.waiting_barrier.take() {
            barrier.resolve(Outcome::Cancelled);
        }
    }

    fn drain_cancelling(queue: &mut VecDeque<Work>) {
        let drained: Vec<Work> = queue.drain(..).collect();
        for w in drained {
            if matches!(w.kind, WorkKind::Post(_)) {
                queue.push_back(w);
            } else {
                w.resolve(Outcome::Cancelled);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Validate and build the rendezvous for a sync descriptor, if any.
    fn prepare_sync(&self, sync: Option<&[&Scheduler]>) -> Result<Option<Arc<Rendezvous>>> {
        let Some(descriptor) = sync else {
            return Ok(None);
        };
        let participants = rendezvous::validate_descriptor(self, descriptor)?;
        for participant in &participants {
            let guard = participant.inner.state.lock().unwrap();
            if let Some(owned) = &guard.waiting_owned_sync {
                if let Some(rdv) = &owned.sync {
                    if rdv.names(self) {
                        return Err(SchedulerError::Misuse(
                            "sync descriptor would form a rendezvous cycle",
                        ));
                    }
                }
            }
        }
        Ok(Some(Rendezvous::new(self.clone(), participants)))
    }

    /// Enqueue `work` on this scheduler and, if it carries a rendezvous,
    /// ask every participant to park itself on that rendezvous.
    fn submit(&self, work: Work, rdv: Option<Arc<Rendezvous>>) {
        self.enqueue(work);
        if let Some(rdv) = rdv {
            for waiter in &rdv.participants {
                waiter.enqueue(Work::sync_marker(Arc::clone(&rdv)));
            }
        }
    }

    fn enqueue(&self, work: Work) {
        let mut state = self.inner.state.lock().unwrap();
        if state.disposed {
            drop(state);
            tracing::debug!(scheduler = %self.inner.name, "submission dropped: scheduler closed");
            work.resolve(Outcome::Cancelled);
            return;
        }
        if state.in_barrier {
            state.barrier_queue.push_back(work);
            return;
        }
        if state.in_atomic {
            state.pending.push_back(work);
            return;
        }
        state.active.push_back(work);
        drop(state);
        self.maybe_spawn_loop();
    }

    fn maybe_spawn_loop(&self) {
        let should_spawn = {
            let mut state = self.inner.state.lock().unwrap();
            if state.loop_spawned {
                false
            } else {
                state.loop_spawned = true;
                true
            }
        };
        if should_spawn {
            let handle = self.clone();
            tracing::trace!(scheduler = %self.inner.name, "spawning run loop");
            tokio::spawn(async move { handle.run_loop_sync() });
        }
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

impl Scheduler {
    /// The run loop body. Spawned onto the Tokio thread pool by
    /// [`Scheduler::maybe_spawn_loop`]; never awaits anything itself, since
    /// every future it drives is polled directly rather than handed back to
    /// Tokio's own executor -- see `waker.rs`.
    fn run_loop_sync(&self) {
        loop {
            let work = {
                let mut state = self.inner.state.lock().unwrap();
                if state.waiting_sync.is_some() || state.waiting_owned_sync.is_some() {
                    state.loop_spawned = false;
                    return;
                }
                match state.active.pop_front() {
                    Some(w) => w,
                    None => {
                        state.loop_spawned = false;
                        return;
                    }
                }
            };
            if let Turn::Parked = self.dispatch(work) {
                // `dispatch` already cleared `loop_spawned` atomically with
                // parking on the rendezvous, in the same critical section.
                // Re-entering the loop to re-check shared state here would
                // race a peer scheduler's thread that can already have
                // cleared the park and be running the protected work
                // concurrently with whatever we'd dequeue next.
                return;
            }
        }
    }

    /// One run-loop turn's worth of branching on a freshly dequeued `Work`.
    /// Returns [`Turn::Parked`] when this scheduler has handed itself off to
    /// a rendezvous and the caller must stop pulling from `active` without
    /// re-checking shared state first.
    fn dispatch(&self, work: Work) -> Turn {
        if work.sync.is_some() {
            // Owner side of a cross-scheduler rendezvous: park and wait for
            // every participant (and ourselves) to arrive. `loop_spawned` is
            // cleared in the same locked section that parks this work so
            // that a waiter's thread crossing the rendezvous to zero first
            // can safely respawn the loop without racing this thread's own
            // exit.
            let rdv = Arc::clone(work.sync.as_ref().unwrap());
            {
                let mut state = self.inner.state.lock().unwrap();
                state.waiting_owned_sync = Some(work);
                state.loop_spawned = false;
            }
            rdv.owner_arrived();
            return Turn::Parked;
        }

        if work.options.contains(SubmitOptions::ATOMIC) {
            let mut state = self.inner.state.lock().unwrap();
            if state.in_atomic {
                drop(state);
                self.report_fault(&SchedulerError::Invariant(
                    "already in an atomic window",
                ));
                return Turn::Continue;
            }
            state.in_atomic = true;
            state.atomic_work = Some(work.id);
            std::mem::swap(&mut state.active, &mut state.pending);
            drop(state);
            tracing::debug!(scheduler = %self.inner.name, work = ?work.id, "entering atomic window");
            self.execute(work);
            return Turn::Continue;
        }

        if matches!(work.kind, WorkKind::Barrier) {
            let mut state = self.inner.state.lock().unwrap();
            // Every submission from this point on is "after the barrier"
            // until it is actually consumed, whether that happens inline
            // below or once quiescence is reached later.
            state.in_barrier = true;
            if self.inner.running_async_count.load(Ordering::Acquire) > 0 {
                state.waiting_barrier = Some(work);
                return Turn::Continue;
            }
            self.consume_barrier_locked(&mut state, work);
            return Turn::Continue;
        }

        if let WorkKind::Sync(rdv) = &work.kind {
            // Waiter side: park and wait for the owner's protected region to
            // end. As with the owner-sync branch above, `loop_spawned` is
            // cleared in the same locked section that parks this scheduler
            // so the owner's release (`clear_sync_wait`, possibly called
            // from the owner's own thread) can't race this thread's exit.
            let rdv = Arc::clone(rdv);
            {
                let mut state = self.inner.state.lock().unwrap();
                state.waiting_sync = Some(Arc::clone(&rdv));
                state.loop_spawned = false;
            }
            rdv.waiter_arrived();
            return Turn::Parked;
        }

        self.execute(work);
        Turn::Continue
    }

    /// Run an ordinary (non-owner-sync) `Work`'s payload. By this point
    /// `work.sync` is always `None`: owner-qualified work is intercepted
    /// earlier in `dispatch` and only ever reaches execution through
    /// [`Scheduler::execute_sync_owned`].
    fn execute(&self, work: Work) {
        let Work {
            id,
            kind,
            completion,
            options,
            ..
        } = work;
        match kind {
            WorkKind::Action(body) => {
                self.run_action(id, body, completion);
            }
            WorkKind::AsyncFn(body) => {
                let token = self.inner.cancel.child_token();
                let fut = body(token);
                self.poll_once(id, fut, completion, options, None);
            }
            WorkKind::Post(target) => self.resume_post(target),
            WorkKind::Barrier | WorkKind::Sync(_) => {
                unreachable!("barrier/sync markers are handled in dispatch")
            }
        }
    }

    fn run_action(
        &self,
        id: WorkId,
        body: Box<dyn FnOnce() + Send>,
        completion: Option<oneshot::Sender<Outcome>>,
    ) {
        tracing::trace!(scheduler = %self.inner.name, work = ?id, "running action");
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)) {
            Ok(()) => self.finish_plain(completion, Outcome::Completed),
            Err(panic) => {
                let err = SchedulerError::UserFault(panic_message(&panic));
                self.report_fault(&err);
                self.finish_plain(completion, Outcome::Faulted(err));
            }
        }
    }

    fn finish_plain(&self, completion: Option<oneshot::Sender<Outcome>>, outcome: Outcome) {
        if let Some(tx) = completion {
            let _ = tx.send(outcome);
        }
    }

    fn report_fault(&self, err: &SchedulerError) {
        let handler = self.inner.unhandled.lock().unwrap().clone();
        match handler {
            Some(f) => f(&self.inner.name, err),
            None => {
                tracing::error!(scheduler = %self.inner.name, error = %err, "unhandled fault in scheduler work")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Async polling and continuation routing
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Poll a freshly obtained future exactly once. If it's immediately
    /// ready, complete inline; otherwise stash it in the in-flight table
    /// under a continuation waker that posts `id` back through
    /// [`SchedulerInner::post_continuation`] whenever it's woken.
    fn poll_once(
        &self,
        id: WorkId,
        mut future: BoxFuture,
        completion: Option<oneshot::Sender<Outcome>>,
        options: SubmitOptions,
        sync: Option<Arc<Rendezvous>>,
    ) {
        let waker = self.continuation_waker(id);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => {
                tracing::trace!(scheduler = %self.inner.name, work = ?id, "async work completed on first poll");
                self.finish_async(result, completion, options, sync);
            }
            Poll::Pending => {
                self.inner.running_async_count.fetch_add(1, Ordering::AcqRel);
                self.inner.inflight.lock().unwrap().insert(
                    id,
                    InFlight {
                        future,
                        completion,
                        options,
                        sync,
                    },
                );
            }
        }
    }

    /// Re-poll a previously suspended future after its continuation waker
    /// fired and the scheduler dequeued the resulting `Post`.
    fn resume_post(&self, id: WorkId) {
        let Some(InFlight {
            mut future,
            completion,
            options,
            sync,
        }) = self.inner.inflight.lock().unwrap().remove(&id)
        else {
            // Already completed and removed (e.g. a spurious extra wake).
            return;
        };
        let waker = self.continuation_waker(id);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                self.inner.inflight.lock().unwrap().insert(
                    id,
                    InFlight {
                        future,
                        completion,
                        options,
                        sync,
                    },
                );
            }
            Poll::Ready(result) => {
                self.inner.running_async_count.fetch_sub(1, Ordering::AcqRel);
                self.finish_async(result, completion, options, sync);
            }
        }
    }

    fn continuation_waker(&self, id: WorkId) -> Waker {
        Waker::from(ContinuationWaker::new(Arc::downgrade(&self.inner), id))
    }

    /// Shared tail for both the immediate-ready and resumed-ready paths:
    /// resolve the promise, release any rendezvous the work owned, exit the
    /// atomic window if this was the atomic work, and check barrier
    /// quiescence.
    fn finish_async(
        &self,
        result: std::result::Result<(), SchedulerError>,
        completion: Option<oneshot::Sender<Outcome>>,
        options: SubmitOptions,
        sync: Option<Arc<Rendezvous>>,
    ) {
        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(e) => {
                self.report_fault(&e);
                Outcome::Faulted(e)
            }
        };
        self.finish_plain(completion, outcome);
        if let Some(rdv) = sync {
            rdv.release_waiters();
        }
        if options.contains(SubmitOptions::ATOMIC) {
            self.exit_atomic();
        }
        self.maybe_consume_barrier_if_quiescent();
    }

    fn exit_atomic(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.in_atomic = false;
        state.atomic_work = None;
        std::mem::swap(&mut state.active, &mut state.pending);
        drop(state);
        tracing::debug!(scheduler = %self.inner.name, "exiting atomic window");
        self.maybe_spawn_loop();
    }

    fn maybe_consume_barrier_if_quiescent(&self) {
        if self.inner.running_async_count.load(Ordering::Acquire) != 0 {
            return;
        }
        let mut state = self.inner.state.lock().unwrap();
        let Some(barrier) = state.waiting_barrier.take() else {
            return;
        };
        self.consume_barrier_locked(&mut state, barrier);
        drop(state);
        self.maybe_spawn_loop();
    }

    /// Resolve `barrier` and drain everything behind it in `barrier_queue`
    /// into `active`, stopping at the next `Barrier` marker (if any). If
    /// that next marker can also be consumed immediately (no in-flight
    /// async work), keep chaining through it -- this handles back-to-back
    /// `set_barrier()` calls with nothing queued between them.
    fn consume_barrier_locked(&self, state: &mut State, barrier: Work) {
        let mut current = barrier;
        loop {
            state.in_barrier = false;
            if let Some(tx) = current.completion.take() {
                let _ = tx.send(Outcome::Completed);
            }
            tracing::debug!(scheduler = %self.inner.name, "barrier consumed");

            let mut next_barrier = None;
            while let Some(w) = state.barrier_queue.pop_front() {
                if matches!(w.kind, WorkKind::Barrier) {
                    next_barrier = Some(w);
                    break;
                }
                state.active.push_back(w);
            }

            match next_barrier {
                None => break,
                Some(next) => {
                    if self.inner.running_async_count.load(Ordering::Acquire) > 0 {
                        state.in_barrier = true;
                        state.waiting_barrier = Some(next);
                        break;
                    }
                    current = next;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cross-scheduler rendezvous hooks
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Called (possibly from a peer scheduler's thread) once every
    /// participant, including the owner, has arrived at the rendezvous. The
    /// protected work is whatever `waiting_owned_sync` holds -- there is
    /// exactly one such work per rendezvous by construction, so no id needs
    /// to travel with the call to find it again.
    pub(crate) fn sync_ready(&self, rdv: Arc<Rendezvous>) {
        let work = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(work) = state.waiting_owned_sync.take() else {
                drop(state);
                self.report_fault(&SchedulerError::Invariant(
                    "rendezvous ready with no parked owner work",
                ));
                return;
            };
            if work.options.contains(SubmitOptions::ATOMIC) {
                if state.in_atomic {
                    drop(state);
                    self.report_fault(&SchedulerError::Invariant(
                        "already in an atomic window",
                    ));
                    rdv.release_waiters();
                    self.maybe_spawn_loop();
                    return;
                }
                state.in_atomic = true;
                state.atomic_work = Some(work.id);
                std::mem::swap(&mut state.active, &mut state.pending);
            }
            work
        };
        self.execute_sync_owned(work, rdv);
    }

    /// Run the owner's protected work once every participant has parked,
    /// releasing waiters at the right point: immediately after an action or
    /// a non-atomic future's first poll, or -- for an atomic future -- only
    /// once [`Scheduler::finish_async`] observes full completion.
    fn execute_sync_owned(&self, work: Work, rdv: Arc<Rendezvous>) {
        let Work {
            id,
            kind,
            completion,
            options,
            ..
        } = work;
        match kind {
            WorkKind::Action(body) => {
                self.run_action(id, body, completion);
                rdv.release_waiters();
                self.maybe_spawn_loop();
            }
            WorkKind::AsyncFn(body) => {
                let token = self.inner.cancel.child_token();
                let fut = body(token);
                if options.contains(SubmitOptions::ATOMIC) {
                    self.poll_once(id, fut, completion, options, Some(rdv));
                } else {
                    self.poll_once(id, fut, completion, options, None);
                    rdv.release_waiters();
                    self.maybe_spawn_loop();
                }
            }
            WorkKind::Post(_) | WorkKind::Barrier | WorkKind::Sync(_) => {
                unreachable!("only Action/AsyncFn work carries a sync rendezvous")
            }
        }
    }

    /// Called by the waiter's run loop via `Rendezvous::release_waiters`
    /// once the owner's protected region has ended.
    pub(crate) fn clear_sync_wait(&self, rdv: &Arc<Rendezvous>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            match state.waiting_sync.take() {
                Some(current) if Arc::ptr_eq(&current, rdv) => {}
                Some(other) => {
                    state.waiting_sync = Some(other);
                    drop(state);
                    self.report_fault(&SchedulerError::Invariant(
                        "sync release does not match the parked rendezvous",
                    ));
                    return;
                }
                None => {
                    drop(state);
                    self.report_fault(&SchedulerError::Invariant(
                        "sync release with no parked rendezvous",
                    ));
                    return;
                }
            }
        }
        self.maybe_spawn_loop();
    }
}

impl SchedulerInner {
    /// Route a continuation's wake-up: if it belongs to the work currently
    /// holding the atomic window, it re-enters `active` so it runs inside
    /// that window; any other continuation that fires during an atomic
    /// window is deferred to `pending`. Outside an atomic window, every
    /// continuation goes straight to `active`.
    pub(crate) fn post_continuation(self: &Arc<Self>, id: WorkId) {
        let scheduler = Scheduler {
            inner: Arc::clone(self),
        };
        let mut state = self.state.lock().unwrap();
        let route_to_pending = state.in_atomic && state.atomic_work != Some(id);
        if route_to_pending {
            state.pending.push_back(Work::post(id));
            return;
        }
        state.active.push_back(Work::post(id));
        drop(state);
        scheduler.maybe_spawn_loop();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "work panicked with a non-string payload".to_string()
    }
}
