// Integration tests are compiled as a separate crate, so these lints don't apply
#![allow(clippy::tests_outside_test_module)]
#![allow(missing_docs)]

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
    sync::{Mutex, mpsc},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use libatomedit::{
    ContentHash, DeltaAction, EngineConfig, FileEdit, LineEnding, MutationEngine, MutationError,
    Patch, PlainRename, Preconditions, RepoPath, Vcs, hash_file,
};
use tempfile::TempDir;

/// Run a git command inside `repo_path`, ensuring it succeeds.
fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
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

/// Create a repository with a few committed files.
fn create_repo() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let repo_path = temp_dir.path().join("repo");
    fs::create_dir_all(repo_path.join("src"))?;

    git(&repo_path, &["init", "-b", "main"])?;
    git(&repo_path, &["config", "user.email", "test@example.com"])?;
    git(&repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("a.txt"), "alpha\n")?;
    fs::write(repo_path.join("old.txt"), "one\ntwo\nthree\nfour\n")?;
    fs::write(repo_path.join("src").join("lib.rs"), "pub fn lib() {}\n")?;
    git(&repo_path, &["add", "."])?;
    git(&repo_path, &["commit", "-m", "Initial commit"])?;

    Ok((temp_dir, repo_path))
}

/// Engine config with short lock waits.
fn fast_config(timeout_ms: u64) -> EngineConfig {
    EngineConfig {
        lock_timeout_ms: timeout_ms,
        lock_poll_interval_ms: 5,
        ..EngineConfig::default()
    }
}

/// Every file under `root` except git metadata, with its bytes.
fn tree(root: &Path) -> Result<BTreeMap<PathBuf, Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_name() == ".git" {
                continue;
            }
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else {
                out.insert(path.strip_prefix(root)?.to_path_buf(), fs::read(&path)?);
            }
        }
        Ok(())
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

/// Every rename is refused.
struct BrokenVcs;

impl Vcs for BrokenVcs {
    fn track_move(&self, _root: &Path, _from: &RepoPath, _to: &RepoPath) -> Result<()> {
        anyhow::bail!("rename refused")
    }
}

/// Signals when a rename starts, then holds the batch's locks for `delay`.
struct SlowVcs {
    /// Told once the rename has started.
    started: Mutex<mpsc::Sender<()>>,
    /// How long to stall before renaming.
    delay: Duration,
}

impl SlowVcs {
    fn new(delay: Duration) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                started: Mutex::new(tx),
                delay,
            },
            rx,
        )
    }
}

impl Vcs for SlowVcs {
    fn track_move(&self, root: &Path, from: &RepoPath, to: &RepoPath) -> Result<()> {
        self.started.lock().unwrap().send(())?;
        thread::sleep(self.delay);
        PlainRename.track_move(root, from, to)
    }
}

#[test]
fn failed_edit_leaves_no_edit_applied() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::builder(&repo).vcs(BrokenVcs).build()?;
    let before = tree(&repo)?;

    let edits = vec![
        FileEdit::update("a.txt", "changed\n"),
        FileEdit::delete("old.txt"),
        FileEdit::move_to("src/lib.rs", "src/moved/lib.rs"),
        FileEdit::create("docs/new.md", "# new\n"),
    ];
    let err = engine
        .apply(&edits, false, &Preconditions::new())
        .unwrap_err();

    assert!(matches!(err, MutationError::ApplyFailure { ref path, .. } if path == "src/lib.rs"));
    assert_eq!(tree(&repo)?, before);
    assert!(!repo.join("docs").exists());
    assert!(!repo.join("src").join("moved").exists());
    Ok(())
}

#[test]
fn reported_hashes_match_disk() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::open(&repo)?;

    let mut preconditions = Preconditions::new();
    preconditions.insert("a.txt".to_string(), hash_file(&repo.join("a.txt"))?);
    preconditions.insert("new.txt".to_string(), ContentHash::absent());

    let edits = vec![
        FileEdit::patch(
            "a.txt",
            vec![Patch::Exact {
                old: "alpha".to_string(),
                new: "beta".to_string(),
                occurrences: 1,
            }],
        ),
        FileEdit::create("new.txt", "fresh\n"),
    ];
    let result = engine.apply(&edits, false, &preconditions)?;

    assert!(result.applied);
    for file in &result.delta.files {
        assert_eq!(
            Some(hash_file(&repo.join(&file.path))?),
            file.new_hash,
            "hash mismatch for {}",
            file.path
        );
    }
    assert_eq!(fs::read_to_string(repo.join("a.txt"))?, "beta\n");
    Ok(())
}

#[test]
fn concurrent_requests_on_same_path_are_serialized() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::builder(&repo).config(fast_config(5000)).build()?;

    let mut preconditions = Preconditions::new();
    preconditions.insert("a.txt".to_string(), hash_file(&repo.join("a.txt"))?);

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let engine = &engine;
                let preconditions = &preconditions;
                scope.spawn(move || {
                    engine.apply(
                        &[FileEdit::update("a.txt", format!("writer {n}\n"))],
                        false,
                        preconditions,
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one writer may win");
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    MutationError::PreconditionFailed { .. } | MutationError::LockTimeout { .. }
                ),
                "unexpected error: {err}"
            );
        }
    }
    assert_eq!(
        Some(hash_file(&repo.join("a.txt"))?),
        winners[0].delta.files[0].new_hash
    );
    Ok(())
}

#[test]
fn waiting_request_rechecks_preconditions_under_lock() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let (slow, started) = SlowVcs::new(Duration::from_millis(300));
    let engine = MutationEngine::builder(&repo)
        .config(fast_config(5000))
        .vcs(slow)
        .build()?;
    let original = hash_file(&repo.join("a.txt"))?;

    thread::scope(|scope| -> Result<()> {
        let first = scope.spawn(|| {
            engine.apply(
                &[
                    FileEdit::move_to("src/lib.rs", "src/core.rs"),
                    FileEdit::update("a.txt", "first\n"),
                ],
                false,
                &Preconditions::new(),
            )
        });
        started.recv()?;

        // The pre-lock check still sees the original content.
        let mut preconditions = Preconditions::new();
        preconditions.insert("a.txt".to_string(), original.clone());
        let err = engine
            .apply(&[FileEdit::update("a.txt", "second\n")], false, &preconditions)
            .unwrap_err();

        match err {
            MutationError::PreconditionFailed { path, actual, .. } => {
                assert_eq!(path, "a.txt");
                assert_eq!(actual, ContentHash::of(b"first\n"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(first.join().unwrap()?.applied);
        Ok(())
    })?;

    assert_eq!(fs::read_to_string(repo.join("a.txt"))?, "first\n");
    Ok(())
}

#[test]
fn lock_wait_is_bounded() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let (slow, started) = SlowVcs::new(Duration::from_millis(800));
    let slow_engine = MutationEngine::builder(&repo)
        .config(fast_config(5000))
        .vcs(slow)
        .build()?;
    let impatient = MutationEngine::builder(&repo).config(fast_config(100)).build()?;

    thread::scope(|scope| -> Result<()> {
        let first = scope.spawn(|| {
            slow_engine.apply(
                &[FileEdit::move_to("a.txt", "b.txt")],
                false,
                &Preconditions::new(),
            )
        });
        started.recv()?;

        let err = impatient
            .apply(&[FileEdit::update("a.txt", "late\n")], false, &Preconditions::new())
            .unwrap_err();
        assert!(matches!(err, MutationError::LockTimeout { .. }), "got {err}");
        assert!(err.is_retryable());

        assert!(first.join().unwrap()?.applied);
        Ok(())
    })?;

    assert!(!repo.join("a.txt").exists());
    assert_eq!(fs::read_to_string(repo.join("b.txt"))?, "alpha\n");
    Ok(())
}

#[test]
fn out_of_scope_batch_changes_nothing() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::builder(&repo)
        .scope(|path: &RepoPath| path.first_component() != "vendor")
        .build()?;
    let before = tree(&repo)?;

    let edits = vec![
        FileEdit::update("a.txt", "changed\n"),
        FileEdit::create("vendor/dep.rs", "x"),
        FileEdit::move_to("src/lib.rs", "../escape.rs"),
    ];
    let err = engine
        .apply(&edits, false, &Preconditions::new())
        .unwrap_err();

    match err {
        MutationError::ScopeViolation { paths } => {
            assert_eq!(paths, vec!["vendor/dep.rs", "../escape.rs"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tree(&repo)?, before);
    assert!(!repo.join(".git").join("atomedit").exists(), "no lock was taken");
    Ok(())
}

#[test]
fn delta_counts_lines_for_create_and_delete() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::open(&repo)?;

    let result = engine.apply(
        &[
            FileEdit::create("three.txt", "a\nb\nc\n"),
            FileEdit::delete("old.txt"),
        ],
        false,
        &Preconditions::new(),
    )?;

    let created = &result.delta.files[0];
    assert_eq!(created.action, DeltaAction::Created);
    assert_eq!((created.insertions, created.deletions), (3, 0));
    assert_eq!(created.old_hash, None);

    let deleted = &result.delta.files[1];
    assert_eq!(deleted.action, DeltaAction::Deleted);
    assert_eq!((deleted.insertions, deleted.deletions), (0, 4));
    assert_eq!(deleted.new_hash, None);

    assert_eq!(result.delta.files_changed, 2);
    assert_eq!(result.delta.insertions, 3);
    assert_eq!(result.delta.deletions, 4);
    Ok(())
}

#[test]
fn dry_run_estimates_without_writing() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::open(&repo)?;
    let before = tree(&repo)?;
    let fingerprint = engine.fingerprint()?;

    let result = engine.apply(
        &[
            FileEdit::update("a.txt", "alpha\nmore\n"),
            FileEdit::create("new.txt", "x\n"),
        ],
        true,
        &Preconditions::new(),
    )?;

    assert!(!result.applied);
    assert!(result.dry_run);
    assert_eq!(result.delta.files_changed, 2);
    assert_eq!(result.delta.insertions, 2);
    assert_eq!(result.previews.len(), 2);
    assert!(result.previews[0].unified_diff.contains("+more"));
    assert_eq!(result.repo_fingerprint, fingerprint);
    assert_eq!(tree(&repo)?, before);
    Ok(())
}

#[test]
fn move_preserves_content_and_history() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::open(&repo)?;
    let original = hash_file(&repo.join("a.txt"))?;

    let result = engine.apply(
        &[FileEdit::move_to("a.txt", "b/a.txt")],
        false,
        &Preconditions::new(),
    )?;

    assert!(!repo.join("a.txt").exists());
    assert_eq!(hash_file(&repo.join("b").join("a.txt"))?, original);

    let moved = &result.delta.files[0];
    assert_eq!(moved.action, DeltaAction::Moved);
    assert_eq!(moved.destination.as_deref(), Some("b/a.txt"));
    assert_eq!(moved.old_hash, moved.new_hash);
    assert_eq!((moved.insertions, moved.deletions), (0, 0));

    let status = git(&repo, &["status", "--porcelain"])?;
    let status = String::from_utf8_lossy(&status.stdout);
    assert!(status.contains("R  a.txt -> b/a.txt"), "status was: {status}");
    Ok(())
}

#[test]
fn crlf_config_normalizes_written_text() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    let engine = MutationEngine::builder(&repo)
        .config(EngineConfig {
            line_ending: LineEnding::Crlf,
            ..EngineConfig::default()
        })
        .build()?;

    engine.apply(
        &[FileEdit::create("win.txt", "a\nb\r\nc")],
        false,
        &Preconditions::new(),
    )?;
    assert_eq!(fs::read(repo.join("win.txt"))?, b"a\r\nb\r\nc");
    Ok(())
}

#[test]
fn ambiguous_patch_is_rejected_untouched() -> Result<()> {
    let (_temp_dir, repo) = create_repo()?;
    fs::write(repo.join("dup.txt"), "x = 1\nx = 1\n")?;
    let engine = MutationEngine::open(&repo)?;
    let before = tree(&repo)?;

    let err = engine
        .apply(
            &[
                FileEdit::update("a.txt", "changed\n"),
                FileEdit::patch(
                    "dup.txt",
                    vec![Patch::Exact {
                        old: "x = 1".to_string(),
                        new: "x = 2".to_string(),
                        occurrences: 1,
                    }],
                ),
            ],
            false,
            &Preconditions::new(),
        )
        .unwrap_err();

    match err {
        MutationError::PatchRejected { path, reason } => {
            assert_eq!(path, "dup.txt");
            assert!(reason.contains("line(s) 1, 2"), "reason was: {reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tree(&repo)?, before);
    Ok(())
}
