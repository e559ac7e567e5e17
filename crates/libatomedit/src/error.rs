use std::{io, result::Result as StdResult, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::hash::ContentHash;

/// Custom Result type for mutation operations.
pub type Result<T> = StdResult<T, MutationError>;

/// Coarse classification of a [`MutationError`], stable for callers and wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is malformed or contradicts the repository state.
    InvalidEdit,
    /// One or more paths are outside the permitted scope.
    ScopeViolation,
    /// A caller-supplied hash no longer matches the file on disk.
    PreconditionFailed,
    /// A path lock could not be acquired in time.
    LockTimeout,
    /// The request was cancelled before any change became visible.
    Cancelled,
    /// A patch could not be applied to the current file content.
    PatchRejected,
    /// The filesystem transformation failed and was rolled back.
    ApplyFailure,
    /// The engine observed a state that contradicts its own guarantees.
    InternalInconsistency,
    /// Engine configuration could not be loaded.
    Config,
    /// An I/O failure outside the apply step.
    Io,
}

/// Errors produced by the mutation engine.
#[derive(Error, Debug)]
pub enum MutationError {
    /// An edit is malformed or conflicts with what exists on disk.
    #[error("Invalid edit for {path}: {reason}")]
    InvalidEdit {
        /// Path named by the offending edit.
        path: String,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// One or more referenced paths are out of scope.
    #[error("Paths outside allowed scope: {}", .paths.join(", "))]
    ScopeViolation {
        /// Every offending path in the batch.
        paths: Vec<String>,
    },

    /// The content on disk no longer matches the caller's expectation.
    #[error("Precondition failed for {path}: expected {expected}, found {actual}")]
    PreconditionFailed {
        /// Path whose hash drifted.
        path: String,
        /// Hash supplied by the caller.
        expected: ContentHash,
        /// Hash currently on disk.
        actual: ContentHash,
    },

    /// A lock could not be acquired within the configured bound.
    #[error("Timed out after {}ms waiting for lock on {path}", .waited.as_millis())]
    LockTimeout {
        /// Path whose lock was contended.
        path: String,
        /// How long the engine waited before giving up.
        waited: Duration,
    },

    /// The request was cancelled before the apply step began.
    #[error("Mutation cancelled")]
    Cancelled,

    /// A patch did not match the current content of its target.
    #[error("Patch rejected for {path}: {reason}")]
    PatchRejected {
        /// Path the patch was aimed at.
        path: String,
        /// Why the patch could not be applied.
        reason: String,
    },

    /// Writing the batch failed; every visible change has been rolled back.
    #[error("Failed to apply edit to {path}: {source}")]
    ApplyFailure {
        /// Path whose edit failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
        /// Secondary problems encountered while rolling back.
        rollback_errors: Vec<String>,
    },

    /// Post-apply state does not match what the engine wrote.
    #[error("Internal inconsistency at {path}: {message}")]
    InternalInconsistency {
        /// Path where the inconsistency was observed.
        path: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Engine configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An underlying I/O operation failed outside the apply step.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MutationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEdit { .. } => ErrorKind::InvalidEdit,
            Self::ScopeViolation { .. } => ErrorKind::ScopeViolation,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PatchRejected { .. } => ErrorKind::PatchRejected,
            Self::ApplyFailure { .. } => ErrorKind::ApplyFailure,
            Self::InternalInconsistency { .. } => ErrorKind::InternalInconsistency,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the same request may succeed if submitted again.
    ///
    /// Precondition failures count as retryable: the caller is expected to
    /// re-read the file and resubmit with fresh hashes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout { .. } | Self::PreconditionFailed { .. } | Self::Cancelled => true,
            Self::ApplyFailure { source, .. } => is_transient(source),
            _ => false,
        }
    }

    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidEdit { .. } | Self::PatchRejected { .. } => 2,
            Self::ScopeViolation { .. } => 3,
            Self::PreconditionFailed { .. } => 4,
            Self::LockTimeout { .. } => 5,
            Self::ApplyFailure { .. } => 6,
            Self::InternalInconsistency { .. } => 70,
            Self::Cancelled => 130,
            _ => 1,
        }
    }

    /// Build an [`MutationError::InvalidEdit`].
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEdit {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`MutationError::ApplyFailure`] with no rollback notes yet.
    pub fn apply(path: impl Into<String>, source: io::Error) -> Self {
        Self::ApplyFailure {
            path: path.into(),
            source,
            rollback_errors: Vec::new(),
        }
    }
}

/// I/O error kinds that usually clear up on their own.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::StorageFull
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}
