//! Scheduler error types.
//!
//! Every fallible public entry point in this crate returns [`Result`], whose
//! error is the single [`SchedulerError`] enum.  Each variant carries enough
//! context for callers to decide how to handle the failure without
//! inspecting opaque strings.

/// Unified error type for the work scheduler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// A submission violated one of the scheduler's contracts (e.g. an
    /// atomic action, a malformed sync descriptor, a promise attached to a
    /// submission that cannot carry one). Raised synchronously from the
    /// submission call that triggered it.
    #[error("misuse: {0}")]
    Misuse(&'static str),

    /// An internal invariant was violated (double-entry into an atomic
    /// window, a sync release that doesn't match the parked rendezvous).
    /// Indicates a bug in this crate, not in caller code.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    /// User code panicked synchronously, or a submitted future resolved to
    /// `Err`.
    #[error("user code faulted: {0}")]
    UserFault(String),

    /// The work was dropped because the scheduler had already been (or was
    /// concurrently) closed, or its future unwound via the shared
    /// cancellation token.
    #[error("scheduler is closed")]
    Cancelled,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;
