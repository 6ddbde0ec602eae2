use thiserror::Error;

use crate::sessions::backend::BackendError;

/// Failure conditions surfaced to callers. Each variant maps to a different
/// user-facing recovery: retry the request, restart the attempt, or give up.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The store dependency is unreachable or a command failed. Never
    /// substituted with an in-memory fallback: that would silently break the
    /// cross-request concurrency guarantees this subsystem exists to provide.
    #[error("session store backend unavailable: {0}")]
    Backend(#[from] BackendError),

    /// A write was attempted against a session that does not exist (expired
    /// or never created). Read and finalize paths treat absence as a normal
    /// outcome instead.
    #[error("attempt session {key} not found")]
    NotFound { key: String },

    /// The submitted question index does not match the session's expected
    /// next index. Never retried: retrying cannot change a logical mismatch.
    #[error("out-of-order submission: expected question {expected}, received {received}")]
    OutOfOrder { expected: u32, received: u32 },

    /// The optimistic-lock retry loop exhausted its attempts because the
    /// session kept changing underneath it.
    #[error("attempt session {key} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrentModification { key: String, attempts: u32 },

    /// A stored record failed to decode or violated the model invariants.
    /// No partial recovery or default-filling is attempted.
    #[error("invalid session record at {key}: {reason}")]
    InvalidRecord { key: String, reason: String },
}
