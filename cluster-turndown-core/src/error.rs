//! The error taxonomy shared across crates. Every crate-local `snafu` error enum exposes a
//! `kind()` method returning one of these so the reconciler can decide retry-vs-fail-vs-exit
//! without knowing which crate an error came from.

/// Classification of a failure, independent of which component raised it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Invalid schedule or config. Synchronous, never retried.
    Configuration,
    /// Transient cloud failure. Retried with bounded backoff, surfaced only after exhaustion.
    ProviderUnavailable,
    /// Provider can't do what was asked (Azure, or an unrecognized provider). Fatal at startup.
    ProviderUnsupported,
    /// PDBs blocked a drain within the deadline. Aborts the turndown, leaves partial cordon.
    DrainBudgetExceeded,
    /// The schedule resource changed under us. Retried once with the latest version.
    ConcurrentModification,
    /// A state machine invariant was violated. Fatal; the process exits for a clean restart.
    InternalInvariantViolation,
}

impl ErrorKind {
    /// Whether the Strategy should retry the operation that produced this error internally,
    /// with bounded exponential backoff, before surfacing anything to the Scheduler.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ProviderUnavailable)
    }

    /// Whether the controller should exit the process to get a clean restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderUnsupported | ErrorKind::InternalInvariantViolation
        )
    }
}
