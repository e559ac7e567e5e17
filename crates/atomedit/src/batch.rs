use std::{fs, path::Path};

use anyhow::{Context, Result};
use libatomedit::{FileEdit, Preconditions};
use serde::Deserialize;

/// An edit batch as written in a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Batch {
    /// Edits, applied in file order.
    #[serde(default)]
    pub edits: Vec<FileEdit>,
    /// Expected hashes keyed by repository path.
    #[serde(default)]
    pub preconditions: Preconditions,
}

impl Batch {
    /// Read and parse a batch file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse batch file {}", path.display()))
    }
}
