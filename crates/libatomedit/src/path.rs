use std::{
    fmt, fs, io,
    path::{Component, Path, PathBuf},
};

use serde::Serialize;
use thiserror::Error;

/// A normalized, repository-relative path.
///
/// Always uses forward slashes and contains only normal components, so two
/// lexical spellings of the same file compare equal. Spellings that differ
/// only through a symlinked directory are told apart on disk with
/// [`RepoPath::canonical_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RepoPath(String);

/// Why a path string could not be turned into a [`RepoPath`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path is empty or names the repository root itself.
    #[error("path is empty")]
    Empty,
    /// The path is absolute or climbs above the repository root.
    #[error("path escapes the repository root")]
    Escapes,
    /// The path is not valid UTF-8.
    #[error("path is not valid UTF-8")]
    NotUnicode,
}

impl RepoPath {
    /// Parse and normalize a caller-supplied path.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') || Path::new(raw).is_absolute() {
            return Err(PathError::Escapes);
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in unified.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(PathError::Escapes);
                    }
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(parts.join("/")))
    }

    /// Build from a path already known to be relative to the root.
    pub fn from_relative(relative: &Path) -> Result<Self, PathError> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    parts.push(name.to_str().ok_or(PathError::NotUnicode)?.to_string());
                }
                Component::CurDir => {}
                _ => return Err(PathError::Escapes),
            }
        }
        if parts.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(parts.join("/")))
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first path component.
    pub fn first_component(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Every path component, root first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Join onto `root` to get the on-disk location.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, p| acc.join(p))
    }

    /// The on-disk identity of the target, used to key locks and to spot two
    /// spellings of one file.
    ///
    /// The nearest existing ancestor directory is canonicalized and the
    /// remaining components are appended as written. The final component is
    /// never resolved: edits replace a symlink itself, never its target.
    pub fn canonical_key(&self, root: &Path) -> io::Result<PathBuf> {
        let target = self.to_path(root);
        let mut ancestor = target.parent();
        while let Some(dir) = ancestor {
            match fs::canonicalize(dir) {
                Ok(resolved) => {
                    let rest = target.strip_prefix(dir).map_err(io::Error::other)?;
                    return Ok(resolved.join(rest));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => ancestor = dir.parent(),
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no existing ancestor for {}", target.display()),
        ))
    }

    /// Check that the on-disk location stays inside `root` after symlinks are
    /// resolved.
    ///
    /// A symlinked directory that leads out of the repository fails the
    /// check. A symlink at the final component is allowed.
    pub fn is_contained(&self, root: &Path) -> io::Result<bool> {
        let canonical_root = fs::canonicalize(root)?;
        Ok(self.canonical_key(root)?.starts_with(&canonical_root))
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let test_cases = vec![
            ("a.txt", "a.txt"),
            ("./a.txt", "a.txt"),
            ("src//lib.rs", "src/lib.rs"),
            ("src/./lib.rs", "src/lib.rs"),
            ("src/old/../lib.rs", "src/lib.rs"),
            (r"src\win\file.rs", "src/win/file.rs"),
            ("dir/", "dir"),
        ];

        for (input, expected) in test_cases {
            assert_eq!(
                RepoPath::parse(input).unwrap().as_str(),
                expected,
                "Failed for input: '{input}'"
            );
        }
    }

    #[test]
    fn test_parse_rejects_escapes() {
        assert_eq!(RepoPath::parse(""), Err(PathError::Empty));
        assert_eq!(RepoPath::parse("."), Err(PathError::Empty));
        assert_eq!(RepoPath::parse("a/.."), Err(PathError::Empty));
        assert_eq!(RepoPath::parse(".."), Err(PathError::Escapes));
        assert_eq!(RepoPath::parse("a/../../b"), Err(PathError::Escapes));
        assert_eq!(RepoPath::parse("/etc/passwd"), Err(PathError::Escapes));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut paths = vec![
            RepoPath::parse("b/a.txt").unwrap(),
            RepoPath::parse("a.txt").unwrap(),
            RepoPath::parse("a/z.txt").unwrap(),
        ];
        paths.sort();
        let names: Vec<_> = paths.iter().map(RepoPath::as_str).collect();
        assert_eq!(names, vec!["a.txt", "a/z.txt", "b/a.txt"]);
    }

    #[test]
    fn containment_checks_nearest_existing_ancestor() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("repo");
        fs::create_dir_all(root.join("src")).unwrap();

        assert!(RepoPath::parse("src/new/deep.rs")
            .unwrap()
            .is_contained(&root)
            .unwrap());
        assert!(RepoPath::parse("top.txt").unwrap().is_contained(&root).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn canonical_key_resolves_symlinked_directories() {
        use std::os::unix::fs as unix_fs;

        let tmp = tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("real")).unwrap();
        unix_fs::symlink(root.join("real"), root.join("link")).unwrap();
        fs::write(root.join("real").join("a.txt"), "x").unwrap();

        let real = RepoPath::parse("real/a.txt").unwrap();
        let alias = RepoPath::parse("link/a.txt").unwrap();
        assert_ne!(real, alias);
        assert_eq!(
            real.canonical_key(&root).unwrap(),
            alias.canonical_key(&root).unwrap()
        );
        assert_eq!(
            RepoPath::parse("link/new/deep.txt")
                .unwrap()
                .canonical_key(&root)
                .unwrap(),
            root.join("real").join("new").join("deep.txt")
        );

        // A symlinked file is its own identity.
        unix_fs::symlink(root.join("real").join("a.txt"), root.join("b.txt")).unwrap();
        assert_eq!(
            RepoPath::parse("b.txt").unwrap().canonical_key(&root).unwrap(),
            root.join("b.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn containment_rejects_symlinked_directory() {
        use std::os::unix::fs as unix_fs;

        let tmp = tempdir().unwrap();
        let root = tmp.path().join("repo");
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        unix_fs::symlink(&outside, root.join("link")).unwrap();

        assert!(!RepoPath::parse("link/file.txt")
            .unwrap()
            .is_contained(&root)
            .unwrap());
    }
}
