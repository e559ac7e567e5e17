use std::{
    collections::{BTreeMap, HashSet},
    iter,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{MutationError, Result},
    hash::ContentHash,
    path::RepoPath,
};

/// Expected content hash per repository path, checked before writing.
pub type Preconditions = BTreeMap<String, ContentHash>;

/// The kind of change a [`FileEdit`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditAction {
    /// Create a file that does not exist yet.
    Create,
    /// Replace or patch an existing file.
    Update,
    /// Remove an existing file.
    Delete,
    /// Rename a file, optionally changing its content.
    Move,
}

/// One text patch, applied to the output of the previous patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Patch {
    /// Replace the 1-based inclusive line range `start..=end` with `content`.
    ///
    /// `end == start - 1` inserts before `start` without removing anything;
    /// `start == line_count + 1` appends.
    Lines {
        /// First line replaced (1-based).
        start: usize,
        /// Last line replaced (inclusive).
        end: usize,
        /// Replacement text.
        #[serde(default)]
        content: String,
    },
    /// Replace every occurrence of `old` with `new`; `old` must occur exactly
    /// `occurrences` times.
    Exact {
        /// Text to find.
        old: String,
        /// Replacement text.
        new: String,
        /// Required number of matches.
        #[serde(default = "default_occurrences")]
        occurrences: usize,
    },
}

/// Serde default for [`Patch::Exact::occurrences`].
fn default_occurrences() -> usize {
    1
}

/// A single requested change to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Repository-relative target path (the source, for moves).
    pub path: String,
    /// What to do with the target.
    pub action: EditAction,
    /// Full replacement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Ordered patches applied to the current content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<Patch>>,
    /// Destination path; required for moves and forbidden otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl FileEdit {
    /// Create `path` with `content`.
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::bare(path, EditAction::Create).with_content(content)
    }

    /// Replace the content of `path`.
    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::bare(path, EditAction::Update).with_content(content)
    }

    /// Patch the content of `path`.
    pub fn patch(path: impl Into<String>, patches: Vec<Patch>) -> Self {
        Self::bare(path, EditAction::Update).with_patches(patches)
    }

    /// Delete `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::bare(path, EditAction::Delete)
    }

    /// Move `path` to `destination`.
    pub fn move_to(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::bare(path, EditAction::Move)
        }
    }

    /// Attach full replacement content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach patches.
    pub fn with_patches(mut self, patches: Vec<Patch>) -> Self {
        self.patches = Some(patches);
        self
    }

    /// An edit with only a path and action set.
    fn bare(path: impl Into<String>, action: EditAction) -> Self {
        Self {
            path: path.into(),
            action,
            content: None,
            patches: None,
            destination: None,
        }
    }

    /// Every raw path this edit touches: the target and, for moves, the destination.
    pub fn referenced_paths(&self) -> impl Iterator<Item = &str> {
        iter::once(self.path.as_str()).chain(self.destination.as_deref())
    }
}

/// Content change carried by an update or a move.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    /// Replace the whole file.
    Replace(&'a str),
    /// Apply patches to the current content.
    Patches(&'a [Patch]),
}

/// Validated form of a [`FileEdit`]; the only shape the executor dispatches on.
#[derive(Debug, Clone)]
pub enum Operation<'a> {
    /// Write a new file.
    Create(&'a str),
    /// Rewrite an existing file.
    Update(Change<'a>),
    /// Remove an existing file.
    Delete,
    /// Rename, then optionally rewrite at the destination.
    Move {
        /// Where the file ends up.
        destination: RepoPath,
        /// Optional rewrite applied after the rename.
        change: Option<Change<'a>>,
    },
}

/// An edit whose shape has been checked and whose paths are normalized.
#[derive(Debug, Clone)]
pub struct PlannedEdit<'a> {
    /// Position in the caller's batch.
    pub index: usize,
    /// Normalized target path.
    pub path: RepoPath,
    /// What to do.
    pub op: Operation<'a>,
}

impl PlannedEdit<'_> {
    /// The path whose content is written last: the destination for moves.
    pub fn final_path(&self) -> &RepoPath {
        match &self.op {
            Operation::Move { destination, .. } => destination,
            _ => &self.path,
        }
    }

    /// The content change to render, if any.
    pub fn change(&self) -> Option<Change<'_>> {
        match &self.op {
            Operation::Create(content) => Some(Change::Replace(content)),
            Operation::Update(change) => Some(*change),
            Operation::Move { change, .. } => *change,
            Operation::Delete => None,
        }
    }
}

/// Parse a raw path for `plan`, mapping errors to `InvalidEdit`.
fn parse_path(raw: &str) -> Result<RepoPath> {
    RepoPath::parse(raw).map_err(|err| MutationError::invalid(raw, err.to_string()))
}

/// Extract the content change from an edit, rejecting ambiguous shapes.
fn change_of(edit: &FileEdit) -> Result<Option<Change<'_>>> {
    match (&edit.content, &edit.patches) {
        (Some(_), Some(_)) => Err(MutationError::invalid(
            &edit.path,
            "content and patches are mutually exclusive",
        )),
        (Some(content), None) => Ok(Some(Change::Replace(content))),
        (None, Some(patches)) if patches.is_empty() => {
            Err(MutationError::invalid(&edit.path, "patch list is empty"))
        }
        (None, Some(patches)) => Ok(Some(Change::Patches(patches))),
        (None, None) => Ok(None),
    }
}

/// Check the shape of every edit and normalize its paths.
///
/// Enforces the per-action field rules and that no path is referenced by
/// more than one edit. Touches nothing on disk.
pub fn plan(edits: &[FileEdit]) -> Result<Vec<PlannedEdit<'_>>> {
    if edits.is_empty() {
        return Err(MutationError::invalid("", "edit batch is empty"));
    }
    let mut planned = Vec::with_capacity(edits.len());
    let mut seen = HashSet::new();

    for (index, edit) in edits.iter().enumerate() {
        let path = parse_path(&edit.path)?;
        if edit.action != EditAction::Move && edit.destination.is_some() {
            return Err(MutationError::invalid(
                &edit.path,
                "destination is only allowed for moves",
            ));
        }

        let op = match edit.action {
            EditAction::Create => match change_of(edit)? {
                None => Operation::Create(""),
                Some(Change::Replace(content)) => Operation::Create(content),
                Some(Change::Patches(_)) => {
                    return Err(MutationError::invalid(
                        &edit.path,
                        "create takes content, not patches",
                    ));
                }
            },
            EditAction::Update => match change_of(edit)? {
                Some(change) => Operation::Update(change),
                None => {
                    return Err(MutationError::invalid(
                        &edit.path,
                        "update requires content or patches",
                    ));
                }
            },
            EditAction::Delete => {
                if change_of(edit)?.is_some() {
                    return Err(MutationError::invalid(
                        &edit.path,
                        "delete takes neither content nor patches",
                    ));
                }
                Operation::Delete
            }
            EditAction::Move => {
                let raw = edit.destination.as_deref().ok_or_else(|| {
                    MutationError::invalid(&edit.path, "move requires a destination")
                })?;
                let destination = parse_path(raw)?;
                if destination == path {
                    return Err(MutationError::invalid(
                        &edit.path,
                        "move destination equals its source",
                    ));
                }
                Operation::Move {
                    destination,
                    change: change_of(edit)?,
                }
            }
        };

        let planned_edit = PlannedEdit { index, path, op };
        for referenced in [Some(&planned_edit.path), destination_of(&planned_edit)]
            .into_iter()
            .flatten()
        {
            if !seen.insert(referenced.clone()) {
                return Err(MutationError::invalid(
                    referenced.as_str(),
                    "path is referenced by more than one edit in the batch",
                ));
            }
        }
        planned.push(planned_edit);
    }

    Ok(planned)
}

/// The destination of a move, if the edit is one.
fn destination_of<'p>(edit: &'p PlannedEdit<'_>) -> Option<&'p RepoPath> {
    match &edit.op {
        Operation::Move { destination, .. } => Some(destination),
        _ => None,
    }
}

/// Label recorded for each file in a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    /// The file was created.
    Created,
    /// The file's content changed in place.
    Updated,
    /// The file was removed.
    Deleted,
    /// The file was renamed (and possibly rewritten).
    Moved,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDelta {
    /// Target path (the source, for moves).
    pub path: String,
    /// What was done.
    pub action: DeltaAction,
    /// New location, for moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Hash before the mutation; `None` if the file did not exist.
    pub old_hash: Option<ContentHash>,
    /// Hash after the mutation; `None` if the file was deleted.
    pub new_hash: Option<ContentHash>,
    /// Lines added.
    pub insertions: usize,
    /// Lines removed.
    pub deletions: usize,
}

/// Aggregate of every [`FileDelta`] in a mutation, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationDelta {
    /// Number of files touched.
    pub files_changed: usize,
    /// Total lines added.
    pub insertions: usize,
    /// Total lines removed.
    pub deletions: usize,
    /// Per-file detail.
    pub files: Vec<FileDelta>,
}

impl MutationDelta {
    /// Aggregate per-file deltas, keeping their order.
    pub fn from_files(files: Vec<FileDelta>) -> Self {
        Self {
            files_changed: files.len(),
            insertions: files.iter().map(|f| f.insertions).sum(),
            deletions: files.iter().map(|f| f.deletions).sum(),
            files,
        }
    }
}

/// Unified diff of one file, produced for dry runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePreview {
    /// File the diff describes.
    pub path: String,
    /// Unified diff with three lines of context.
    pub unified_diff: String,
}

/// Outcome of one `apply` call.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResult {
    /// Whether the changes were written to disk.
    pub applied: bool,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Identifier for audit and idempotency correlation.
    pub mutation_id: String,
    /// What changed (or would change, for dry runs).
    pub delta: MutationDelta,
    /// Symbols plausibly affected, as reported by the impact resolver.
    pub affected_symbols: Vec<String>,
    /// Test targets plausibly affected, as reported by the impact resolver.
    pub affected_tests: Vec<String>,
    /// Fingerprint of the in-scope repository contents after the call.
    pub repo_fingerprint: String,
    /// Per-file diffs, populated only for dry runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub previews: Vec<FilePreview>,
}

/// A single problem found by `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The path is outside the allowed scope.
    ScopeViolation {
        /// Offending path.
        path: String,
    },
    /// The expected hash does not match the file on disk.
    PreconditionFailed {
        /// Path whose hash drifted.
        path: String,
        /// Hash supplied by the caller.
        expected: ContentHash,
        /// Hash currently on disk.
        actual: ContentHash,
    },
    /// The edit is malformed or conflicts with the repository state.
    InvalidEdit {
        /// Path named by the edit.
        path: String,
        /// What is wrong.
        reason: String,
    },
}

/// Outcome of a pre-flight `validate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// `true` when no violations were found.
    pub ok: bool,
    /// Every problem found.
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// Build a result, deriving `ok` from the violation list.
    pub fn new(violations: Vec<Violation>) -> Self {
        Self {
            ok: violations.is_empty(),
            violations,
        }
    }
}
