use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::path::RepoPath;

/// Run a git command with the given arguments in the specified directory.
/// Returns the output if successful, otherwise returns an error with the full command details.
fn run_git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let command = format!("git {}", args.join(" "));
        anyhow::bail!("Git command failed: {}\nError: {}", command, stderr.trim());
    }

    Ok(output)
}

/// Walk up from `start_dir` to find the nearest repository root containing a `.git` entry.
pub fn find_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Check whether `path` lies inside a git work tree.
pub fn is_work_tree(path: &Path) -> Result<bool> {
    let output = run_git(path, &["rev-parse", "--is-inside-work-tree"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
}

/// Check whether `file` is tracked by the index of the repository at `repo_path`.
pub fn is_tracked(repo_path: &Path, file: &str) -> Result<bool> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(["ls-files", "--error-unmatch", "--", file])
        .output()
        .with_context(|| format!("Failed to execute git command: git ls-files {file}"))?;
    Ok(output.status.success())
}

/// Rename `from` to `to` through the index so history follows the file.
pub fn mv(repo_path: &Path, from: &str, to: &str) -> Result<()> {
    run_git(repo_path, &["mv", "--", from, to])?;
    Ok(())
}

/// Version-control collaborator that performs tracked renames.
pub trait Vcs: Send + Sync {
    /// Move `from` to `to` under `root`. The destination's parent exists and
    /// the destination itself does not.
    fn track_move(&self, root: &Path, from: &RepoPath, to: &RepoPath) -> Result<()>;
}

/// Renames through `git mv` when the source is tracked, falling back to a
/// plain rename for untracked files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitVcs;

impl Vcs for GitVcs {
    fn track_move(&self, root: &Path, from: &RepoPath, to: &RepoPath) -> Result<()> {
        if is_tracked(root, from.as_str())? {
            mv(root, from.as_str(), to.as_str())
        } else {
            PlainRename.track_move(root, from, to)
        }
    }
}

/// Renames with the filesystem only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRename;

impl Vcs for PlainRename {
    fn track_move(&self, root: &Path, from: &RepoPath, to: &RepoPath) -> Result<()> {
        let src = from.to_path(root);
        let dst = to.to_path(root);
        fs::rename(&src, &dst)
            .with_context(|| format!("Failed to rename {} to {}", src.display(), dst.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> Result<(TempDir, PathBuf)> {
        let temp_dir = TempDir::new()?;
        let repo_path = temp_dir.path().to_path_buf();

        run_git(&repo_path, &["init", "-b", "main"])?;
        run_git(&repo_path, &["config", "user.email", "test@example.com"])?;
        run_git(&repo_path, &["config", "user.name", "Test User"])?;

        Ok((temp_dir, repo_path))
    }

    fn repo_path(raw: &str) -> RepoPath {
        RepoPath::parse(raw).unwrap()
    }

    #[test]
    fn test_find_root_walks_up() -> Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        let nested = repo.join("a").join("b");
        fs::create_dir_all(&nested)?;

        assert_eq!(find_root(&nested), Some(repo.clone()));
        assert!(is_work_tree(&nested)?);
        Ok(())
    }

    #[test]
    fn test_is_tracked() -> Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::write(repo.join("tracked.txt"), "x")?;
        fs::write(repo.join("loose.txt"), "y")?;
        run_git(&repo, &["add", "tracked.txt"])?;

        assert!(is_tracked(&repo, "tracked.txt")?);
        assert!(!is_tracked(&repo, "loose.txt")?);
        Ok(())
    }

    #[test]
    fn test_git_vcs_moves_tracked_file_through_index() -> Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::write(repo.join("a.txt"), "content")?;
        run_git(&repo, &["add", "a.txt"])?;
        run_git(&repo, &["commit", "-m", "Initial commit"])?;

        GitVcs.track_move(&repo, &repo_path("a.txt"), &repo_path("b.txt"))?;

        assert!(!repo.join("a.txt").exists());
        assert_eq!(fs::read_to_string(repo.join("b.txt"))?, "content");
        let status = run_git(&repo, &["status", "--porcelain"])?;
        let status = String::from_utf8_lossy(&status.stdout);
        assert!(status.contains("R  a.txt -> b.txt"), "status was: {status}");
        Ok(())
    }

    #[test]
    fn test_git_vcs_renames_untracked_file() -> Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::write(repo.join("loose.txt"), "y")?;

        GitVcs.track_move(&repo, &repo_path("loose.txt"), &repo_path("moved.txt"))?;

        assert!(!repo.join("loose.txt").exists());
        assert!(repo.join("moved.txt").exists());
        assert!(!is_tracked(&repo, "moved.txt")?);
        Ok(())
    }

    #[test]
    fn test_plain_rename_reports_missing_source() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let err = PlainRename
            .track_move(temp_dir.path(), &repo_path("nope.txt"), &repo_path("x.txt"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to rename"));
        Ok(())
    }
}
