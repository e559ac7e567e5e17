use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    path::RepoPath,
    scope::{ScopePolicy, is_reserved},
};

/// Number of hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 12;

/// Short content hash used for deltas and optimistic preconditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw file bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = hex::encode(Sha256::digest(bytes));
        Self(digest[..HASH_LEN].to_string())
    }

    /// Sentinel standing in for a file that does not exist.
    pub fn absent() -> Self {
        Self("0".repeat(HASH_LEN))
    }

    /// Whether this is the [`ContentHash::absent`] sentinel.
    pub fn is_absent(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Wrap a caller-supplied hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The hex form of the hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read a file, returning `None` when it does not exist.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Hash the file at `path`, or return the absent sentinel when it is missing.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    Ok(read_optional(path)?
        .map(|bytes| ContentHash::of(&bytes))
        .unwrap_or_else(ContentHash::absent))
}

/// Compute a fingerprint over every in-scope file below `root`.
///
/// The walk honours `.gitignore` files so build output does not churn the
/// fingerprint. Paths are sorted before hashing, so the result depends only on
/// file names and contents.
pub fn fingerprint(root: &Path, scope: &dyn ScopePolicy) -> io::Result<String> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .parents(false)
        .require_git(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .is_none_or(|name| !is_reserved(name))
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(repo_path) = RepoPath::from_relative(relative) else {
            continue;
        };
        if scope.in_scope(&repo_path) {
            entries.push((repo_path.as_str().to_string(), entry.path().to_path_buf()));
        }
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for (name, path) in entries {
        let hash = hash_file(&path)?;
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(hash.as_str().as_bytes());
        hasher.update([b'\n']);
    }
    Ok(hex::encode(hasher.finalize()))
}
