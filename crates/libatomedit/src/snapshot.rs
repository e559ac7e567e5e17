use std::{collections::HashMap, io, path::Path};

use crate::{hash::read_optional, path::RepoPath, types::PlannedEdit};

/// Contents of every path a batch references, read once under the lock
/// before anything is written.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Bytes per path; `None` when the file did not exist.
    files: HashMap<RepoPath, Option<Vec<u8>>>,
}

impl Snapshot {
    /// Read the current content of every source and destination in `plan`.
    pub fn capture(root: &Path, plan: &[PlannedEdit<'_>]) -> io::Result<Self> {
        let mut files = HashMap::new();
        for edit in plan {
            for path in [&edit.path, edit.final_path()] {
                if !files.contains_key(path) {
                    files.insert(path.clone(), read_optional(&path.to_path(root))?);
                }
            }
        }
        Ok(Self { files })
    }

    /// Bytes of `path` before the batch, or `None` if it was absent.
    pub fn get(&self, path: &RepoPath) -> Option<&[u8]> {
        self.files.get(path).and_then(Option::as_deref)
    }
}
