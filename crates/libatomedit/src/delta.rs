use std::path::Path;

use similar::{ChangeTag, TextDiff};

use crate::{
    error::{MutationError, Result},
    hash::{ContentHash, read_optional},
    path::RepoPath,
    snapshot::Snapshot,
    types::{DeltaAction, FileDelta, FilePreview, MutationDelta, Operation, PlannedEdit},
};

/// Count inserted and deleted lines between two versions of a file.
pub fn line_stats(old: &[u8], new: &[u8]) -> (usize, usize) {
    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());
    diff.iter_all_changes()
        .fold((0, 0), |(ins, del), change| match change.tag() {
            ChangeTag::Insert => (ins + 1, del),
            ChangeTag::Delete => (ins, del + 1),
            ChangeTag::Equal => (ins, del),
        })
}

/// Unified diff with three lines of context, or `None` when the text is unchanged.
pub fn unified_diff(old_path: &str, new_path: &str, old: &[u8], new: &[u8]) -> Option<String> {
    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());
    let unified = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{old_path}"), &format!("b/{new_path}"))
        .to_string();
    if unified.is_empty() {
        None
    } else {
        Some(unified)
    }
}

/// Content a planned edit leaves behind, given what it rendered.
///
/// Deletes leave nothing; pure moves carry the source bytes along.
fn after<'s>(
    edit: &PlannedEdit<'_>,
    snapshot: &'s Snapshot,
    rendered: Option<&'s [u8]>,
) -> Option<&'s [u8]> {
    match edit.op {
        Operation::Delete => None,
        _ => rendered.or_else(|| snapshot.get(&edit.path)),
    }
}

/// Build the delta entry for one edit from its before and after content.
fn file_delta(edit: &PlannedEdit<'_>, old: Option<&[u8]>, new: Option<&[u8]>) -> FileDelta {
    let (action, destination) = match &edit.op {
        Operation::Create(_) => (DeltaAction::Created, None),
        Operation::Update(_) => (DeltaAction::Updated, None),
        Operation::Delete => (DeltaAction::Deleted, None),
        Operation::Move { destination, .. } => (DeltaAction::Moved, Some(destination.to_string())),
    };
    let (insertions, deletions) = line_stats(old.unwrap_or_default(), new.unwrap_or_default());
    FileDelta {
        path: edit.path.to_string(),
        action,
        destination,
        old_hash: old.map(ContentHash::of),
        new_hash: new.map(ContentHash::of),
        insertions,
        deletions,
    }
}

/// Predict the delta of a batch without touching the disk.
pub fn estimate(
    plan: &[PlannedEdit<'_>],
    snapshot: &Snapshot,
    rendered: &[Option<Vec<u8>>],
) -> MutationDelta {
    let files = plan
        .iter()
        .zip(rendered)
        .map(|(edit, out)| {
            let new = after(edit, snapshot, out.as_deref());
            file_delta(edit, snapshot.get(&edit.path), new)
        })
        .collect();
    MutationDelta::from_files(files)
}

/// One unified diff per edit whose text would change.
pub fn previews(
    plan: &[PlannedEdit<'_>],
    snapshot: &Snapshot,
    rendered: &[Option<Vec<u8>>],
) -> Vec<FilePreview> {
    plan.iter()
        .zip(rendered)
        .filter_map(|(edit, out)| {
            let old = snapshot.get(&edit.path).unwrap_or_default();
            let new = after(edit, snapshot, out.as_deref()).unwrap_or_default();
            let target = edit.final_path().as_str();
            unified_diff(edit.path.as_str(), target, old, new).map(|unified_diff| FilePreview {
                path: target.to_string(),
                unified_diff,
            })
        })
        .collect()
}

/// Read back every target after apply and build the delta from disk.
///
/// Each file must hold exactly the bytes the executor wrote, deleted files
/// and move sources must be gone. Anything else is an internal inconsistency.
pub fn verify(
    root: &Path,
    plan: &[PlannedEdit<'_>],
    snapshot: &Snapshot,
    rendered: &[Option<Vec<u8>>],
) -> Result<MutationDelta> {
    let mut files = Vec::with_capacity(plan.len());
    for (edit, out) in plan.iter().zip(rendered) {
        let expected = after(edit, snapshot, out.as_deref());
        let on_disk = read_back(root, edit.final_path())?;
        if on_disk.as_deref().map(ContentHash::of) != expected.map(ContentHash::of) {
            return Err(inconsistent(
                edit.final_path(),
                "content on disk differs from what was written",
            ));
        }
        if let Operation::Move { .. } = edit.op
            && read_back(root, &edit.path)?.is_some()
        {
            return Err(inconsistent(&edit.path, "move source still exists"));
        }
        files.push(file_delta(edit, snapshot.get(&edit.path), on_disk.as_deref()));
    }
    Ok(MutationDelta::from_files(files))
}

/// Read a target after apply, mapping failures to an internal inconsistency.
fn read_back(root: &Path, path: &RepoPath) -> Result<Option<Vec<u8>>> {
    read_optional(&path.to_path(root))
        .map_err(|err| inconsistent(path, &format!("cannot read back file: {err}")))
}

/// Build a [`MutationError::InternalInconsistency`].
fn inconsistent(path: &RepoPath, message: &str) -> MutationError {
    MutationError::InternalInconsistency {
        path: path.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_stats() {
        let test_cases: Vec<(&str, &str, (usize, usize))> = vec![
            ("", "a\nb\nc\n", (3, 0)),
            ("a\nb\n", "", (0, 2)),
            ("a\nb\nc\n", "a\nB\nc\n", (1, 1)),
            ("a\n", "a\n", (0, 0)),
        ];

        for (old, new, expected) in test_cases {
            assert_eq!(
                line_stats(old.as_bytes(), new.as_bytes()),
                expected,
                "Failed for input: '{old}' -> '{new}'"
            );
        }
    }

    #[test]
    fn unified_diff_has_headers_and_context() {
        let diff = unified_diff("a.txt", "a.txt", b"1\n2\n3\n", b"1\ntwo\n3\n").unwrap();
        assert!(diff.starts_with("--- a/a.txt\n+++ b/a.txt\n"), "got: {diff}");
        assert!(diff.contains("-2\n+two\n"));
        assert!(unified_diff("a", "a", b"same\n", b"same\n").is_none());
    }
}
