use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tracing::debug;

use crate::error::{MutationError, Result};

/// Lifecycle of one mutation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Created, nothing checked yet.
    Pending,
    /// Scope, shape, precondition and existence checks running.
    Validating,
    /// Refused before any write.
    Rejected,
    /// Acquiring path locks.
    Locking,
    /// Gave up waiting for a lock.
    LockTimeout,
    /// Writing to disk.
    Applying,
    /// The apply step failed and was rolled back.
    Failed,
    /// Every edit is on disk.
    Applied,
    /// Locks released; the request is over.
    Done,
}

impl RequestState {
    /// Whether a request may move from `self` to `next`.
    ///
    /// `Locking -> Done` is the dry-run exit: locks were taken for a
    /// consistent estimate and nothing was written.
    pub fn can_advance_to(self, next: Self) -> bool {
        use RequestState::{
            Applied, Applying, Done, Failed, LockTimeout, Locking, Pending, Rejected, Validating,
        };
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rejected | Locking)
                | (Locking, Rejected | LockTimeout | Applying | Done)
                | (Applying, Failed | Applied)
                | (Rejected | LockTimeout | Failed | Applied, Done)
        )
    }

    /// Whether this is an outcome state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::LockTimeout | Self::Failed | Self::Applied
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Enforces legal [`RequestState`] transitions for a single request.
#[derive(Debug)]
pub struct StateTracker {
    /// Current state.
    state: RequestState,
    /// Every state visited, in order.
    history: Vec<RequestState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    /// Start a request in [`RequestState::Pending`].
    pub fn new() -> Self {
        Self {
            state: RequestState::Pending,
            history: vec![RequestState::Pending],
        }
    }

    /// The current state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Every state visited so far.
    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    /// Move to `next`, failing if the transition is not allowed.
    pub fn advance(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(MutationError::InternalInconsistency {
                path: String::new(),
                message: format!("illegal request transition {} -> {next}", self.state),
            });
        }
        debug!(from = %self.state, to = %next, "request state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Record `terminal` and `Done`, then hand back `err`.
    pub fn fail<T>(&mut self, terminal: RequestState, err: MutationError) -> Result<T> {
        self.advance(terminal)?;
        self.advance(RequestState::Done)?;
        Err(err)
    }
}

/// Shared flag a caller sets to abandon a request before it starts writing.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`MutationError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MutationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
