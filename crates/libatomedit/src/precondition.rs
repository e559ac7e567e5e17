use std::{collections::HashSet, fs, io, path::Path};

use crate::{
    error::{MutationError, Result},
    hash::{ContentHash, hash_file},
    path::RepoPath,
    types::{Operation, PlannedEdit, Preconditions, Violation},
};

/// Compare every expected hash in `preconditions` with the file on disk.
///
/// Returns one violation per mismatch. Keys that are not valid repository
/// paths, or that name a directory or other non-regular file, are reported
/// as invalid edits.
pub fn violations(root: &Path, preconditions: &Preconditions) -> Result<Vec<Violation>> {
    let mut found = Vec::new();
    for (raw, expected) in preconditions {
        let path = match RepoPath::parse(raw) {
            Ok(path) => path,
            Err(_) => {
                found.push(Violation::InvalidEdit {
                    path: raw.clone(),
                    reason: "precondition key is not a repository path".to_string(),
                });
                continue;
            }
        };
        let actual = match presence(root, &path)? {
            Presence::Absent => ContentHash::absent(),
            Presence::File => hash_file(&path.to_path(root))?,
            Presence::Other => {
                found.push(Violation::InvalidEdit {
                    path: raw.clone(),
                    reason: "precondition key is not a regular file".to_string(),
                });
                continue;
            }
        };
        if &actual != expected {
            found.push(Violation::PreconditionFailed {
                path: raw.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(found)
}

/// Fail on the first precondition that does not hold.
pub fn check(root: &Path, preconditions: &Preconditions) -> Result<()> {
    match violations(root, preconditions)?.into_iter().next() {
        None => Ok(()),
        Some(violation) => Err(violation.into()),
    }
}

/// What currently sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    /// Nothing.
    Absent,
    /// A regular file.
    File,
    /// A directory, symlink or other special entry.
    Other,
}

/// Classify the entry at `path` without following symlinks.
fn presence(root: &Path, path: &RepoPath) -> io::Result<Presence> {
    match fs::symlink_metadata(path.to_path(root)) {
        Ok(meta) if meta.is_file() => Ok(Presence::File),
        Ok(_) => Ok(Presence::Other),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Presence::Absent),
        Err(err) => Err(err),
    }
}

/// Check the existence rules of every planned edit against the disk.
///
/// Creates and move destinations must be absent; every other target must be
/// an existing regular file. No two edits may reach the same file through
/// different spellings, such as a path through a symlinked directory.
pub fn existence_violations(root: &Path, plan: &[PlannedEdit<'_>]) -> Result<Vec<Violation>> {
    let mut found = alias_violations(root, plan)?;
    for edit in plan {
        let source = presence(root, &edit.path)?;
        let reason = match (&edit.op, source) {
            (Operation::Create(_), Presence::Absent) => None,
            (Operation::Create(_), _) => Some("file already exists"),
            (_, Presence::Absent) => Some("file does not exist"),
            (_, Presence::Other) => Some("not a regular file"),
            (_, Presence::File) => None,
        };
        if let Some(reason) = reason {
            found.push(Violation::InvalidEdit {
                path: edit.path.to_string(),
                reason: reason.to_string(),
            });
        }
        if let Operation::Move { destination, .. } = &edit.op
            && presence(root, destination)? != Presence::Absent
        {
            found.push(Violation::InvalidEdit {
                path: destination.to_string(),
                reason: "move destination already exists".to_string(),
            });
        }
    }
    Ok(found)
}

/// Report paths that name, on disk, a file another edit already references.
fn alias_violations(root: &Path, plan: &[PlannedEdit<'_>]) -> io::Result<Vec<Violation>> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for edit in plan {
        let destination = match &edit.op {
            Operation::Move { destination, .. } => Some(destination),
            _ => None,
        };
        for path in [Some(&edit.path), destination].into_iter().flatten() {
            if !seen.insert(path.canonical_key(root)?) {
                found.push(Violation::InvalidEdit {
                    path: path.to_string(),
                    reason: "path is referenced by more than one edit in the batch".to_string(),
                });
            }
        }
    }
    Ok(found)
}

/// Fail on the first existence rule that does not hold.
pub fn check_existence(root: &Path, plan: &[PlannedEdit<'_>]) -> Result<()> {
    match existence_violations(root, plan)?.into_iter().next() {
        None => Ok(()),
        Some(violation) => Err(violation.into()),
    }
}

impl From<Violation> for MutationError {
    fn from(violation: Violation) -> Self {
        match violation {
            Violation::ScopeViolation { path } => Self::ScopeViolation { paths: vec![path] },
            Violation::PreconditionFailed {
                path,
                expected,
                actual,
            } => Self::PreconditionFailed {
                path,
                expected,
                actual,
            },
            Violation::InvalidEdit { path, reason } => Self::InvalidEdit { path, reason },
        }
    }
}
