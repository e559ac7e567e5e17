use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    thread,
};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{
    config::LineEnding,
    error::{MutationError, Result},
    git::Vcs,
    path::RepoPath,
    render::render,
    snapshot::Snapshot,
    types::{Operation, PlannedEdit},
};

/// Rendered bytes per edit, in batch order; `None` where nothing was rendered.
pub type Rendered = Vec<Option<Vec<u8>>>;

/// One visible change made during commit, kept so it can be undone.
#[derive(Debug)]
enum Step {
    /// A directory created to hold a new file.
    CreatedDir(PathBuf),
    /// A file atomically replaced; `original` is `None` if it was created.
    Replaced {
        /// Target file.
        path: PathBuf,
        /// Bytes before the replace.
        original: Option<Vec<u8>>,
    },
    /// A file removed.
    Removed {
        /// Removed file.
        path: PathBuf,
        /// Bytes before removal.
        original: Vec<u8>,
    },
    /// A rename performed through the VCS collaborator.
    Moved {
        /// Old location.
        from: RepoPath,
        /// New location.
        to: RepoPath,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatedDir(dir) => write!(f, "remove directory {}", dir.display()),
            Self::Replaced {
                path,
                original: Some(_),
            } => write!(f, "restore {}", path.display()),
            Self::Replaced {
                path,
                original: None,
            } => write!(f, "remove created file {}", path.display()),
            Self::Removed { path, .. } => write!(f, "recreate {}", path.display()),
            Self::Moved { from, to } => write!(f, "move {to} back to {from}"),
        }
    }
}

/// Output of staging one edit.
#[derive(Debug)]
struct Staged {
    /// Final content, if the edit writes any.
    rendered: Option<Vec<u8>>,
    /// Synced temporary file next to the target, ready to be renamed into place.
    temp: Option<NamedTempFile>,
}

/// Applies a planned, locked batch to the working tree.
pub struct Executor<'a> {
    /// Repository root.
    root: &'a Path,
    /// Performs renames for moves.
    vcs: &'a dyn Vcs,
    /// Line ending convention for rendered text.
    ending: LineEnding,
    /// Staging worker count.
    workers: usize,
}

impl<'a> Executor<'a> {
    /// Create an executor for `root`.
    pub fn new(root: &'a Path, vcs: &'a dyn Vcs, ending: LineEnding, workers: usize) -> Self {
        Self {
            root,
            vcs,
            ending,
            workers: workers.max(1),
        }
    }

    /// Render every edit without writing anything.
    pub fn render_all(&self, plan: &[PlannedEdit<'_>], snapshot: &Snapshot) -> Result<Rendered> {
        plan.iter()
            .map(|edit| self.render_one(edit, snapshot))
            .collect()
    }

    /// Apply the batch. Either every edit is committed or every visible change
    /// is undone before the error is returned.
    pub fn execute(&self, plan: &[PlannedEdit<'_>], snapshot: &Snapshot) -> Result<Rendered> {
        let mut journal = Vec::new();
        let outcome = self
            .prepare_dirs(plan, &mut journal)
            .and_then(|()| self.stage(plan, snapshot))
            .and_then(|staged| self.commit(plan, snapshot, staged, &mut journal));

        match outcome {
            Ok(rendered) => Ok(rendered),
            Err(mut err) => {
                let failures = self.rollback(journal);
                if let MutationError::ApplyFailure {
                    rollback_errors, ..
                } = &mut err
                {
                    rollback_errors.extend(failures);
                }
                Err(err)
            }
        }
    }

    /// Render the content one edit writes.
    fn render_one(&self, edit: &PlannedEdit<'_>, snapshot: &Snapshot) -> Result<Option<Vec<u8>>> {
        edit.change()
            .map(|change| render(&edit.path, snapshot.get(&edit.path), change, self.ending))
            .transpose()
    }

    /// Create missing parent directories for creates and move destinations.
    fn prepare_dirs(&self, plan: &[PlannedEdit<'_>], journal: &mut Vec<Step>) -> Result<()> {
        for edit in plan {
            if matches!(edit.op, Operation::Create(_) | Operation::Move { .. }) {
                let target = edit.final_path();
                self.create_parents(target, journal)
                    .map_err(|err| MutationError::apply(target.as_str(), err))?;
            }
        }
        Ok(())
    }

    /// Create every missing ancestor of `path` below the root, outermost first.
    fn create_parents(&self, path: &RepoPath, journal: &mut Vec<Step>) -> io::Result<()> {
        let target = path.to_path(self.root);
        let mut missing = Vec::new();
        let mut dir = target.parent();
        while let Some(current) = dir {
            if current == self.root || current.exists() {
                break;
            }
            missing.push(current.to_path_buf());
            dir = current.parent();
        }
        for dir in missing.into_iter().rev() {
            fs::create_dir(&dir)?;
            debug!(dir = %dir.display(), "created directory");
            journal.push(Step::CreatedDir(dir));
        }
        Ok(())
    }

    /// Render and write every edit to a synced temp file, in parallel.
    fn stage(&self, plan: &[PlannedEdit<'_>], snapshot: &Snapshot) -> Result<Vec<Staged>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = plan.len().div_ceil(self.workers);

        thread::scope(|scope| {
            let handles: Vec<_> = plan
                .chunks(chunk)
                .map(|batch| {
                    scope.spawn(move || {
                        batch
                            .iter()
                            .map(|edit| self.stage_one(edit, snapshot))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut staged = Vec::with_capacity(plan.len());
            for handle in handles {
                let results = handle.join().map_err(|_| MutationError::InternalInconsistency {
                    path: String::new(),
                    message: "staging worker panicked".to_string(),
                })?;
                for result in results {
                    staged.push(result?);
                }
            }
            Ok(staged)
        })
    }

    /// Render one edit and write it next to its target.
    fn stage_one(&self, edit: &PlannedEdit<'_>, snapshot: &Snapshot) -> Result<Staged> {
        let Some(bytes) = self.render_one(edit, snapshot)? else {
            return Ok(Staged {
                rendered: None,
                temp: None,
            });
        };
        let target = edit.final_path();
        let temp = write_temp(
            &target.to_path(self.root),
            &bytes,
            &edit.path.to_path(self.root),
        )
        .map_err(|err| MutationError::apply(target.as_str(), err))?;
        Ok(Staged {
            rendered: Some(bytes),
            temp: Some(temp),
        })
    }

    /// Make every staged edit visible, in batch order.
    fn commit(
        &self,
        plan: &[PlannedEdit<'_>],
        snapshot: &Snapshot,
        staged: Vec<Staged>,
        journal: &mut Vec<Step>,
    ) -> Result<Rendered> {
        let mut rendered = Vec::with_capacity(plan.len());
        for (edit, staged) in plan.iter().zip(staged) {
            self.commit_one(edit, snapshot, staged.temp, journal)?;
            rendered.push(staged.rendered);
        }
        Ok(rendered)
    }

    /// Commit a single edit, journaling each visible step as it happens.
    fn commit_one(
        &self,
        edit: &PlannedEdit<'_>,
        snapshot: &Snapshot,
        temp: Option<NamedTempFile>,
        journal: &mut Vec<Step>,
    ) -> Result<()> {
        let source = edit.path.to_path(self.root);
        let fail = |path: &RepoPath| {
            let path = path.to_string();
            move |err: io::Error| MutationError::apply(path, err)
        };

        match &edit.op {
            Operation::Create(_) | Operation::Update(_) => {
                let temp = temp.ok_or_else(|| missing_stage(&edit.path))?;
                temp.persist(&source)
                    .map_err(|err| MutationError::apply(edit.path.as_str(), err.error))?;
                journal.push(Step::Replaced {
                    path: source.clone(),
                    original: snapshot.get(&edit.path).map(<[u8]>::to_vec),
                });
                sync_parent(&source).map_err(fail(&edit.path))?;
            }
            Operation::Delete => {
                fs::remove_file(&source).map_err(fail(&edit.path))?;
                journal.push(Step::Removed {
                    path: source.clone(),
                    original: snapshot.get(&edit.path).unwrap_or_default().to_vec(),
                });
                sync_parent(&source).map_err(fail(&edit.path))?;
            }
            Operation::Move { destination, .. } => {
                let target = destination.to_path(self.root);
                self.vcs
                    .track_move(self.root, &edit.path, destination)
                    .map_err(|err| {
                        MutationError::apply(edit.path.as_str(), io::Error::other(format!("{err:#}")))
                    })?;
                journal.push(Step::Moved {
                    from: edit.path.clone(),
                    to: destination.clone(),
                });
                sync_parent(&source).map_err(fail(&edit.path))?;
                sync_parent(&target).map_err(fail(destination))?;

                if let Some(temp) = temp {
                    temp.persist(&target)
                        .map_err(|err| MutationError::apply(destination.as_str(), err.error))?;
                    journal.push(Step::Replaced {
                        path: target.clone(),
                        original: snapshot.get(&edit.path).map(<[u8]>::to_vec),
                    });
                    sync_parent(&target).map_err(fail(destination))?;
                }
            }
        }
        debug!(path = %edit.path, index = edit.index, "committed edit");
        Ok(())
    }

    /// Undo journaled steps in reverse. Returns a message per step that could
    /// not be undone.
    fn rollback(&self, journal: Vec<Step>) -> Vec<String> {
        let mut failures = Vec::new();
        for step in journal.into_iter().rev() {
            if let Err(err) = self.undo(&step) {
                let message = format!("failed to {step}: {err:#}");
                warn!(%message, "rollback step failed");
                failures.push(message);
            } else {
                debug!(step = %step, "rolled back");
            }
        }
        failures
    }

    /// Reverse one step.
    fn undo(&self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::CreatedDir(dir) => fs::remove_dir(dir)?,
            Step::Replaced {
                path,
                original: Some(bytes),
            }
            | Step::Removed {
                path,
                original: bytes,
            } => atomic_write(path, bytes)?,
            Step::Replaced {
                path,
                original: None,
            } => {
                fs::remove_file(path)?;
                sync_parent(path)?;
            }
            Step::Moved { from, to } => self.vcs.track_move(self.root, to, from)?,
        }
        Ok(())
    }
}

/// Error for a commit that found no staged file where one was expected.
fn missing_stage(path: &RepoPath) -> MutationError {
    MutationError::InternalInconsistency {
        path: path.to_string(),
        message: "no staged content for edit".to_string(),
    }
}

/// Write `bytes` to a synced temp file in `target`'s directory.
///
/// Permissions are copied from `template` when it exists.
fn write_temp(target: &Path, bytes: &[u8], template: &Path) -> io::Result<NamedTempFile> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::other("target has no parent directory"))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    copy_permissions(temp.path(), template)?;
    Ok(temp)
}

/// Atomically replace `path` with `bytes`.
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = write_temp(path, bytes, path)?;
    temp.persist(path).map_err(|err| err.error)?;
    sync_parent(path)
}

/// Give `file` the permissions of `template`, or regular-file defaults.
fn copy_permissions(file: &Path, template: &Path) -> io::Result<()> {
    match fs::metadata(template) {
        Ok(meta) => fs::set_permissions(file, meta.permissions()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => default_permissions(file),
        Err(err) => Err(err),
    }
}

/// Temp files are created owner-only; widen new files to `0644`.
#[cfg(unix)]
fn default_permissions(file: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(file, fs::Permissions::from_mode(0o644))
}

/// No-op where permissions are not mode bits.
#[cfg(not(unix))]
fn default_permissions(_file: &Path) -> io::Result<()> {
    Ok(())
}

/// Flush the directory entry of `path` to disk.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) => fs::File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

/// Directories cannot be opened for syncing here.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}
