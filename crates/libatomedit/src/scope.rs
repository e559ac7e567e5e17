use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::{
    path::{PathError, RepoPath},
    types::{FileEdit, Preconditions},
};

/// Top-level directories no edit may ever touch, whatever the policy says.
const RESERVED_DIRS: &[&str] = &[".git", ".atomedit"];

/// Git metadata name, reserved at any depth for nested repositories and submodules.
const GIT_DIR: &str = ".git";

/// Whether `name` is one of the engine's reserved top-level directory names.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_DIRS.contains(&name)
}

/// Whether `path` lies in a reserved top-level directory or in any `.git`.
fn in_reserved_dir(path: &RepoPath) -> bool {
    is_reserved(path.first_component()) || path.components().any(|c| c == GIT_DIR)
}

/// Decides whether a repository path may be modified.
///
/// The engine consults this for every path an edit references, including
/// both ends of a move, before it touches the filesystem.
pub trait ScopePolicy: Send + Sync {
    /// Return `true` if `path` may be modified.
    fn in_scope(&self, path: &RepoPath) -> bool;
}

impl<F> ScopePolicy for F
where
    F: Fn(&RepoPath) -> bool + Send + Sync,
{
    fn in_scope(&self, path: &RepoPath) -> bool {
        self(path)
    }
}

/// Policy that admits every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ScopePolicy for AllowAll {
    fn in_scope(&self, _path: &RepoPath) -> bool {
        true
    }
}

/// Policy that excludes paths matching any of a list of glob patterns.
#[derive(Debug, Clone)]
pub struct GlobScope {
    /// Compiled exclusion patterns.
    excludes: GlobSet,
}

impl GlobScope {
    /// Compile exclusion patterns.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid exclude pattern '{pattern}'"))?;
            builder.add(glob);
        }
        let excludes = builder.build().context("Failed to compile exclude patterns")?;
        Ok(Self { excludes })
    }
}

impl ScopePolicy for GlobScope {
    fn in_scope(&self, path: &RepoPath) -> bool {
        !self.excludes.is_match(path.as_str())
    }
}

/// Combines the caller's policy with configured exclusions and the
/// reserved-directory tier.
#[derive(Clone)]
pub struct ScopeGate {
    /// Policy supplied by the embedding application.
    policy: Arc<dyn ScopePolicy>,
    /// Exclusions from engine configuration.
    excludes: Option<GlobScope>,
}

impl ScopeGate {
    /// Build a gate from a caller policy and optional configured exclusions.
    pub fn new(policy: Arc<dyn ScopePolicy>, excludes: Option<GlobScope>) -> Self {
        Self { policy, excludes }
    }

    /// Return every path referenced by `edits` or keyed in `preconditions`
    /// that is out of scope.
    ///
    /// Precondition keys are gated like edit paths because checking them
    /// reads the file. Paths that escape the repository, resolve outside it
    /// through a symlinked directory, or fall in a reserved directory are
    /// always reported. Paths too malformed to parse are left to edit
    /// validation.
    pub fn violations(
        &self,
        root: &Path,
        edits: &[FileEdit],
        preconditions: &Preconditions,
    ) -> Vec<String> {
        let referenced = edits
            .iter()
            .flat_map(FileEdit::referenced_paths)
            .chain(preconditions.keys().map(String::as_str));

        let mut offending: Vec<String> = Vec::new();
        for raw in referenced {
            let allowed = match RepoPath::parse(raw) {
                Ok(path) => self.allows(root, &path),
                Err(PathError::Escapes) => false,
                Err(_) => true,
            };
            if !allowed && !offending.iter().any(|p| p == raw) {
                offending.push(raw.to_string());
            }
        }
        offending
    }

    /// Whether a single parsed path passes every tier.
    fn allows(&self, root: &Path, path: &RepoPath) -> bool {
        if in_reserved_dir(path) {
            return false;
        }
        if let Some(excludes) = &self.excludes
            && !excludes.in_scope(path)
        {
            return false;
        }
        if !self.policy.in_scope(path) {
            return false;
        }
        path.is_contained(root).unwrap_or(false)
    }
}

impl ScopePolicy for ScopeGate {
    fn in_scope(&self, path: &RepoPath) -> bool {
        !in_reserved_dir(path)
            && self.excludes.as_ref().is_none_or(|e| e.in_scope(path))
            && self.policy.in_scope(path)
    }
}
