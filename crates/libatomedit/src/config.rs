use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on the default staging pool size.
const MAX_DEFAULT_PARALLEL: usize = 8;

/// Line terminator convention applied to rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    Crlf,
}

/// Engine settings, read from `.atomedit.toml` at the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bounded wait per lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Retry interval for cross-process lock files, in milliseconds.
    pub lock_poll_interval_ms: u64,
    /// Maximum number of edits staged concurrently.
    pub max_parallel: usize,
    /// Line ending convention for written text.
    pub line_ending: LineEnding,
    /// Lock file directory, relative to the root. Derived when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,
    /// Glob patterns for paths that may never be edited.
    pub exclude: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            lock_poll_interval_ms: 20,
            max_parallel: thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                .min(MAX_DEFAULT_PARALLEL),
            line_ending: LineEnding::Lf,
            lock_dir: None,
            exclude: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// File name looked up at the repository root.
    pub const FILE_NAME: &'static str = ".atomedit.toml";

    /// Load configuration for `root`, returning defaults when no file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        if config.max_parallel == 0 {
            anyhow::bail!("max_parallel in {} must be at least 1", path.display());
        }
        Ok(config)
    }

    /// Bounded wait per lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Retry interval for lock files.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }

    /// Absolute lock directory for `root`.
    ///
    /// Defaults to `.git/atomedit/locks` inside a git checkout so lock files
    /// never show up as untracked changes, else `.atomedit/locks`.
    pub fn lock_dir(&self, root: &Path) -> PathBuf {
        match &self.lock_dir {
            Some(dir) => root.join(dir),
            None if root.join(".git").is_dir() => root.join(".git").join("atomedit").join("locks"),
            None => root.join(".atomedit").join("locks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_config_returns_defaults() {
        let tmp = tempdir().unwrap();
        let config = EngineConfig::load(tmp.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert!(config.max_parallel >= 1 && config.max_parallel <= MAX_DEFAULT_PARALLEL);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(EngineConfig::FILE_NAME),
            "lock_timeout_ms = 250\nline_ending = \"crlf\"\nexclude = [\"target/**\"]\n",
        )
        .unwrap();

        let config = EngineConfig::load(tmp.path()).unwrap();
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.line_ending, LineEnding::Crlf);
        assert_eq!(config.exclude, vec!["target/**".to_string()]);
        assert_eq!(config.lock_poll_interval_ms, 20);
    }

    #[test]
    fn invalid_config_names_the_file() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(EngineConfig::FILE_NAME), "lock_timeout_ms = \"soon\"").unwrap();

        let err = EngineConfig::load(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains(EngineConfig::FILE_NAME));
    }

    #[test]
    fn lock_dir_prefers_git_directory() {
        let tmp = tempdir().unwrap();
        let config = EngineConfig::default();
        assert_eq!(
            config.lock_dir(tmp.path()),
            tmp.path().join(".atomedit").join("locks")
        );

        fs::create_dir(tmp.path().join(".git")).unwrap();
        assert_eq!(
            config.lock_dir(tmp.path()),
            tmp.path().join(".git").join("atomedit").join("locks")
        );
    }
}
