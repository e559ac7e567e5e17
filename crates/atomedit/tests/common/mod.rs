use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, ensure};
use tempfile::TempDir;

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Initialise a git repository with an initial commit.
pub fn init_repository(repo_path: &Path) -> Result<()> {
    git(repo_path, &["init", "-b", "main"])?;
    git(repo_path, &["config", "user.email", "test@example.com"])?;
    git(repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("README.md"), "# Test Project\n")?;
    fs::write(repo_path.join("notes.txt"), "first\nsecond\nthird\n")?;
    git(repo_path, &["add", "."])?;
    git(repo_path, &["commit", "-m", "Initial commit"])?;

    Ok(())
}

/// Create a temporary git repository named `name`.
pub fn create_repo(name: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let repo_path = temp_dir.path().join(name);
    fs::create_dir_all(&repo_path)?;
    init_repository(&repo_path)?;
    Ok((temp_dir, repo_path))
}

/// Path to the compiled atomedit binary.
pub fn atomedit_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_atomedit"))
}

/// Run atomedit inside `repo_path` with colors off.
pub fn run_atomedit(repo_path: &Path, args: &[&str]) -> Result<Output> {
    Command::new(atomedit_binary())
        .current_dir(repo_path)
        .arg("--no-color")
        .args(args)
        .env_remove("ATOMEDIT_LOG")
        .output()
        .context("failed to run atomedit")
}

/// Write a batch file into `dir` and return its path.
pub fn write_batch(dir: &Path, contents: &str) -> Result<PathBuf> {
    let path = dir.join("batch.toml");
    fs::write(&path, contents)?;
    Ok(path)
}
