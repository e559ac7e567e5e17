use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{
        Condvar, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use fs4::FileExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    error::{MutationError, Result},
    path::RepoPath,
};

/// Windows `ERROR_LOCK_VIOLATION`, returned when a lock file is held elsewhere.
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Process-wide table of held path locks.
///
/// Serializes threads of this process before they touch the lock file, so
/// waiting threads park on the condvar instead of polling.
struct Registry {
    /// Canonical key to the token of the request holding it.
    held: Mutex<HashMap<PathBuf, u64>>,
    /// Signalled whenever an entry is removed.
    released: Condvar,
}

impl Registry {
    /// The single registry shared by every engine in the process.
    fn global() -> &'static Self {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        })
    }

    /// Lock the table, recovering from poisoning.
    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, u64>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` for `owner`, waiting until `deadline`. Returns `false` on timeout.
    fn claim(&self, key: &Path, owner: u64, deadline: Instant) -> bool {
        let mut table = self.table();
        while table.contains_key(key) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            table = self
                .released
                .wait_timeout(table, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        table.insert(key.to_path_buf(), owner);
        true
    }

    /// Drop `owner`'s claim on `key` and wake waiters.
    fn release(&self, key: &Path, owner: u64) {
        let mut table = self.table();
        if table.get(key) == Some(&owner) {
            table.remove(key);
        }
        drop(table);
        self.released.notify_all();
    }
}

/// Source of unique request tokens for registry ownership.
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// One held path lock: a registry claim plus an exclusive lock file.
#[derive(Debug)]
struct HeldLock {
    /// Path as named by the edit batch.
    path: RepoPath,
    /// Canonical on-disk identity used as the registry key.
    key: PathBuf,
    /// Open, exclusively locked lock file.
    file: File,
}

/// Every lock taken by one request. Released in reverse order on drop.
#[derive(Debug)]
pub struct LockSet {
    /// Registry owner token for this request.
    owner: u64,
    /// Locks in acquisition order.
    held: Vec<HeldLock>,
}

impl LockSet {
    /// Paths covered by this set, in acquisition order.
    pub fn paths(&self) -> impl Iterator<Item = &RepoPath> {
        self.held.iter().map(|h| &h.path)
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether no locks are held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let registry = Registry::global();
        while let Some(lock) = self.held.pop() {
            let _ = FileExt::unlock(&lock.file);
            registry.release(&lock.key, self.owner);
            debug!(path = %lock.path, "released lock");
        }
    }
}

/// Acquires per-path exclusive locks for a repository.
#[derive(Debug, Clone)]
pub struct LockManager {
    /// Repository root; lock keys are resolved below it.
    root: PathBuf,
    /// Directory holding lock files.
    lock_dir: PathBuf,
    /// Bounded wait per lock.
    timeout: Duration,
    /// Retry interval for contended lock files.
    poll_interval: Duration,
}

impl LockManager {
    /// Create a manager for the repository at `root`.
    pub fn new(root: &Path, lock_dir: PathBuf, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            lock_dir,
            timeout,
            poll_interval,
        }
    }

    /// Lock every path in `paths`, in canonical order.
    ///
    /// Each path is keyed by [`RepoPath::canonical_key`], so spellings that
    /// reach one file through a symlinked directory share a lock and are
    /// locked once. Locks are taken in key order. Each lock waits at most the
    /// configured timeout; on failure every lock taken so far is released
    /// before the error is returned.
    pub fn acquire<'a>(&self, paths: impl IntoIterator<Item = &'a RepoPath>) -> Result<LockSet> {
        let mut ordered: BTreeMap<PathBuf, &RepoPath> = BTreeMap::new();
        for path in paths {
            let key = path.canonical_key(&self.root)?;
            ordered
                .entry(key)
                .and_modify(|first| *first = (*first).min(path))
                .or_insert(path);
        }
        fs::create_dir_all(&self.lock_dir)?;

        let mut set = LockSet {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            held: Vec::with_capacity(ordered.len()),
        };
        for (key, path) in ordered {
            let lock = self.acquire_one(path, key, set.owner)?;
            set.held.push(lock);
        }
        Ok(set)
    }

    /// Release a lock set explicitly.
    pub fn release(&self, set: LockSet) {
        drop(set);
    }

    /// Take both layers of the lock on one path.
    fn acquire_one(&self, path: &RepoPath, key: PathBuf, owner: u64) -> Result<HeldLock> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let registry = Registry::global();

        if !registry.claim(&key, owner, deadline) {
            return Err(timeout(path, started));
        }

        match self.lock_file(path, &key, deadline) {
            Ok(Some(file)) => {
                debug!(path = %path, waited_ms = started.elapsed().as_millis(), "acquired lock");
                Ok(HeldLock {
                    path: path.clone(),
                    key,
                    file,
                })
            }
            Ok(None) => {
                registry.release(&key, owner);
                Err(timeout(path, started))
            }
            Err(err) => {
                registry.release(&key, owner);
                Err(err.into())
            }
        }
    }

    /// Poll the cross-process lock file until it is ours or `deadline` passes.
    fn lock_file(&self, path: &RepoPath, key: &Path, deadline: Instant) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_file_path(&self.lock_dir, key))?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(file)),
                Err(err) if is_contended(&err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    debug!(path = %path, "lock file busy, retrying");
                    thread::sleep(self.poll_interval.min(deadline - now));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Lock file for the canonical key `key`.
pub fn lock_file_path(lock_dir: &Path, key: &Path) -> PathBuf {
    let digest = hex::encode(Sha256::digest(key.to_string_lossy().as_bytes()));
    lock_dir.join(format!("{digest}.lock"))
}

/// Whether a lock attempt failed only because someone else holds the lock.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows) && err.raw_os_error() == Some(ERROR_LOCK_VIOLATION))
}

/// Build a [`MutationError::LockTimeout`] for `path`.
fn timeout(path: &RepoPath, started: Instant) -> MutationError {
    MutationError::LockTimeout {
        path: path.to_string(),
        waited: started.elapsed(),
    }
}
