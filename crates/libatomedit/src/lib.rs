#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Atomic, lock-protected batch file edits for Git repositories.
//!
//! [`MutationEngine`] is the single choke point through which edits reach
//! the working tree. A batch of [`FileEdit`]s is checked against the scope
//! policy, the caller's preconditions and the repository state, locked path
//! by path in a canonical order, and then committed all-or-nothing. The
//! result carries a structured [`MutationDelta`] describing exactly what
//! changed. The CLI binary in `crates/atomedit` builds on top of this library.

/// Engine configuration loaded from `.atomedit.toml`.
mod config;
/// Line-based deltas and unified-diff previews.
mod delta;
/// Request coordinator.
mod engine;
/// Error type and classification.
mod error;
/// Two-phase staging and commit with rollback.
mod executor;
/// Helper routines for interacting with Git repositories.
mod git;
/// Content hashes and repository fingerprints.
mod hash;
/// Best-effort post-apply collaborators.
mod impact;
/// Per-path exclusive locks.
mod lock;
/// Normalized repository-relative paths.
mod path;
/// Precondition and existence checks.
mod precondition;
/// Patch application and line-ending normalization.
mod render;
/// Scope policies.
mod scope;
/// Before-state capture.
mod snapshot;
/// Request lifecycle and cancellation.
mod state;
/// Edit, delta and result data model.
mod types;

pub use config::{EngineConfig, LineEnding};
pub use delta::{line_stats, unified_diff};
pub use engine::{MutationEngine, MutationEngineBuilder};
pub use error::{ErrorKind, MutationError, Result};
pub use git::{GitVcs, PlainRename, Vcs, find_root};
pub use hash::{ContentHash, fingerprint, hash_file};
pub use impact::{Impact, ImpactResolver, MutationObserver, NoImpact};
pub use lock::{LockManager, LockSet};
pub use path::{PathError, RepoPath};
pub use render::normalize;
pub use scope::{AllowAll, GlobScope, ScopePolicy};
pub use state::{CancelFlag, RequestState, StateTracker};
pub use types::{
    DeltaAction, EditAction, FileDelta, FileEdit, FilePreview, MutationDelta, MutationResult,
    Patch, Preconditions, ValidationResult, Violation,
};
