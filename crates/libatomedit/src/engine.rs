use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    delta,
    error::{MutationError, Result},
    executor::Executor,
    git::{self, GitVcs, PlainRename, Vcs},
    hash::fingerprint,
    impact::{self, ImpactResolver, MutationObserver, NoImpact},
    lock::{LockManager, LockSet},
    precondition,
    scope::{AllowAll, GlobScope, ScopeGate, ScopePolicy},
    snapshot::Snapshot,
    state::{CancelFlag, RequestState, StateTracker},
    types::{
        FileEdit, MutationResult, Operation, PlannedEdit, Preconditions, ValidationResult,
        Violation, plan,
    },
};

/// Configures and builds a [`MutationEngine`].
pub struct MutationEngineBuilder {
    /// Repository root.
    root: PathBuf,
    /// Explicit configuration; loaded from the root when unset.
    config: Option<EngineConfig>,
    /// Caller scope policy.
    scope: Arc<dyn ScopePolicy>,
    /// Rename collaborator; detected from the root when unset.
    vcs: Option<Arc<dyn Vcs>>,
    /// Impact collaborator.
    impact: Arc<dyn ImpactResolver>,
    /// Post-apply observer.
    observer: Option<MutationObserver>,
}

impl MutationEngineBuilder {
    /// Use `config` instead of reading `.atomedit.toml`.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Restrict edits to paths accepted by `scope`.
    pub fn scope(mut self, scope: impl ScopePolicy + 'static) -> Self {
        self.scope = Arc::new(scope);
        self
    }

    /// Perform moves through `vcs`.
    pub fn vcs(mut self, vcs: impl Vcs + 'static) -> Self {
        self.vcs = Some(Arc::new(vcs));
        self
    }

    /// Populate affected symbols and tests with `resolver`.
    pub fn impact(mut self, resolver: impl ImpactResolver + 'static) -> Self {
        self.impact = Arc::new(resolver);
        self
    }

    /// Call `observer` with the changed paths after every applied mutation.
    pub fn on_mutation(mut self, observer: impl Fn(&[PathBuf]) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Resolve the root and configuration and build the engine.
    pub fn build(self) -> Result<MutationEngine> {
        let root = fs::canonicalize(&self.root)?;
        let config = match self.config {
            Some(config) => config,
            None => EngineConfig::load(&root).map_err(|err| MutationError::Config(format!("{err:#}")))?,
        };
        let excludes = if config.exclude.is_empty() {
            None
        } else {
            Some(
                GlobScope::new(&config.exclude)
                    .map_err(|err| MutationError::Config(format!("{err:#}")))?,
            )
        };
        let vcs = self.vcs.unwrap_or_else(|| {
            if git::is_work_tree(&root).unwrap_or(false) {
                Arc::new(GitVcs)
            } else {
                Arc::new(PlainRename)
            }
        });
        let locks = LockManager::new(
            &root,
            config.lock_dir(&root),
            config.lock_timeout(),
            config.poll_interval(),
        );

        Ok(MutationEngine {
            scope: ScopeGate::new(self.scope, excludes),
            root,
            config,
            vcs,
            impact: self.impact,
            observer: self.observer,
            locks,
        })
    }
}

/// The single choke point for on-disk changes to one repository.
///
/// Safe to share between threads; concurrent requests on overlapping paths
/// are serialized by path locks.
pub struct MutationEngine {
    /// Canonical repository root.
    root: PathBuf,
    /// Effective configuration.
    config: EngineConfig,
    /// Combined scope rules.
    scope: ScopeGate,
    /// Rename collaborator.
    vcs: Arc<dyn Vcs>,
    /// Impact collaborator.
    impact: Arc<dyn ImpactResolver>,
    /// Post-apply observer.
    observer: Option<MutationObserver>,
    /// Path lock manager.
    locks: LockManager,
}

impl MutationEngine {
    /// Start configuring an engine for the repository at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> MutationEngineBuilder {
        MutationEngineBuilder {
            root: root.into(),
            config: None,
            scope: Arc::new(AllowAll),
            vcs: None,
            impact: Arc::new(NoImpact),
            observer: None,
        }
    }

    /// Build an engine for `root` with every default.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).build()
    }

    /// Canonical repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fingerprint of the in-scope repository contents.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(fingerprint(&self.root, &self.scope)?)
    }

    /// Pre-flight check: scope, edit shape, existence and preconditions.
    ///
    /// Takes no locks and writes nothing. When any path is out of scope only
    /// the scope violations are reported, so nothing out of scope is read.
    pub fn validate(
        &self,
        edits: &[FileEdit],
        preconditions: &Preconditions,
    ) -> Result<ValidationResult> {
        let span = info_span!("validate", edits = edits.len());
        let _guard = span.enter();

        let mut violations: Vec<Violation> = self
            .scope
            .violations(&self.root, edits, preconditions)
            .into_iter()
            .map(|path| Violation::ScopeViolation { path })
            .collect();

        if violations.is_empty() {
            match plan(edits) {
                Ok(planned) => {
                    violations.extend(precondition::existence_violations(&self.root, &planned)?);
                }
                Err(MutationError::InvalidEdit { path, reason }) => {
                    violations.push(Violation::InvalidEdit { path, reason });
                }
                Err(err) => return Err(err),
            }
            violations.extend(precondition::violations(&self.root, preconditions)?);
        }

        let result = ValidationResult::new(violations);
        info!(ok = result.ok, violations = result.violations.len(), "validated");
        Ok(result)
    }

    /// Apply a batch of edits all-or-nothing.
    ///
    /// With `dry_run` the batch is checked and locked, the delta and a
    /// per-file diff are estimated, and nothing is written.
    pub fn apply(
        &self,
        edits: &[FileEdit],
        dry_run: bool,
        preconditions: &Preconditions,
    ) -> Result<MutationResult> {
        self.apply_cancellable(edits, dry_run, preconditions, &CancelFlag::new())
    }

    /// [`MutationEngine::apply`], abandoning the request with
    /// [`MutationError::Cancelled`] if `cancel` is set before writing starts.
    pub fn apply_cancellable(
        &self,
        edits: &[FileEdit],
        dry_run: bool,
        preconditions: &Preconditions,
        cancel: &CancelFlag,
    ) -> Result<MutationResult> {
        let mutation_id = Uuid::new_v4().to_string();
        let span = info_span!("mutation", id = %mutation_id, edits = edits.len(), dry_run);
        let _guard = span.enter();
        let mut state = StateTracker::new();

        state.advance(RequestState::Validating)?;
        let planned = match self.admit(edits, preconditions, cancel) {
            Ok(planned) => planned,
            Err(err) => {
                info!(error = %err, "mutation rejected");
                return state.fail(RequestState::Rejected, err);
            }
        };

        state.advance(RequestState::Locking)?;
        let locks = match self
            .locks
            .acquire(planned.iter().flat_map(|e| [&e.path, e.final_path()]))
        {
            Ok(locks) => locks,
            Err(err) => {
                info!(error = %err, "mutation could not lock");
                let terminal = match err {
                    MutationError::LockTimeout { .. } => RequestState::LockTimeout,
                    _ => RequestState::Rejected,
                };
                return state.fail(terminal, err);
            }
        };

        let snapshot = match self.recheck(&planned, preconditions, cancel) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.locks.release(locks);
                info!(error = %err, "mutation rejected under lock");
                return state.fail(RequestState::Rejected, err);
            }
        };

        if dry_run {
            return self.dry_run(&planned, &snapshot, locks, &mut state, mutation_id);
        }

        state.advance(RequestState::Applying)?;
        let executor = Executor::new(
            &self.root,
            self.vcs.as_ref(),
            self.config.line_ending,
            self.config.max_parallel,
        );
        let verified = executor
            .execute(&planned, &snapshot)
            .and_then(|rendered| delta::verify(&self.root, &planned, &snapshot, &rendered));
        let delta = match verified {
            Ok(delta) => delta,
            Err(err) => {
                self.locks.release(locks);
                warn!(error = %err, "mutation failed");
                return state.fail(RequestState::Failed, err);
            }
        };
        let repo_fingerprint = self.fingerprint_or_empty();
        state.advance(RequestState::Applied)?;
        self.locks.release(locks);
        state.advance(RequestState::Done)?;
        info!(
            files = delta.files_changed,
            insertions = delta.insertions,
            deletions = delta.deletions,
            "mutation applied"
        );

        let impact = impact::resolve_best_effort(self.impact.as_ref(), &delta);
        if let Some(observer) = &self.observer {
            impact::notify(observer, &self.changed_paths(&planned));
        }

        Ok(MutationResult {
            applied: true,
            dry_run: false,
            mutation_id,
            delta,
            affected_symbols: impact.symbols,
            affected_tests: impact.tests,
            repo_fingerprint,
            previews: Vec::new(),
        })
    }

    /// Checks run before any lock is taken.
    fn admit<'e>(
        &self,
        edits: &'e [FileEdit],
        preconditions: &Preconditions,
        cancel: &CancelFlag,
    ) -> Result<Vec<PlannedEdit<'e>>> {
        cancel.check()?;
        let offending = self.scope.violations(&self.root, edits, preconditions);
        if !offending.is_empty() {
            return Err(MutationError::ScopeViolation { paths: offending });
        }
        let planned = plan(edits)?;
        precondition::check(&self.root, preconditions)?;
        precondition::check_existence(&self.root, &planned)?;
        cancel.check()?;
        Ok(planned)
    }

    /// Checks repeated once every lock is held, then the before-state snapshot.
    fn recheck(
        &self,
        planned: &[PlannedEdit<'_>],
        preconditions: &Preconditions,
        cancel: &CancelFlag,
    ) -> Result<Snapshot> {
        cancel.check()?;
        precondition::check(&self.root, preconditions)?;
        precondition::check_existence(&self.root, planned)?;
        Ok(Snapshot::capture(&self.root, planned)?)
    }

    /// Estimate the outcome of a locked batch and release the locks.
    fn dry_run(
        &self,
        planned: &[PlannedEdit<'_>],
        snapshot: &Snapshot,
        locks: LockSet,
        state: &mut StateTracker,
        mutation_id: String,
    ) -> Result<MutationResult> {
        let executor = Executor::new(
            &self.root,
            self.vcs.as_ref(),
            self.config.line_ending,
            self.config.max_parallel,
        );
        let rendered = match executor.render_all(planned, snapshot) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.locks.release(locks);
                return state.fail(RequestState::Rejected, err);
            }
        };
        let delta = delta::estimate(planned, snapshot, &rendered);
        let previews = delta::previews(planned, snapshot, &rendered);
        let repo_fingerprint = self.fingerprint_or_empty();
        self.locks.release(locks);
        state.advance(RequestState::Done)?;
        info!(files = delta.files_changed, "dry run estimated");

        Ok(MutationResult {
            applied: false,
            dry_run: true,
            mutation_id,
            delta,
            affected_symbols: Vec::new(),
            affected_tests: Vec::new(),
            repo_fingerprint,
            previews,
        })
    }

    /// Fingerprint for a result. A failure here cannot undo a committed batch,
    /// so it is logged and reported as an empty string.
    fn fingerprint_or_empty(&self) -> String {
        fingerprint(&self.root, &self.scope).unwrap_or_else(|err| {
            warn!(error = %err, "failed to fingerprint repository");
            String::new()
        })
    }

    /// Absolute paths touched by a batch, move destinations included.
    fn changed_paths(&self, planned: &[PlannedEdit<'_>]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for edit in planned {
            paths.push(edit.path.to_path(&self.root));
            if let Operation::Move { destination, .. } = &edit.op {
                paths.push(destination.to_path(&self.root));
            }
        }
        paths
    }
}
