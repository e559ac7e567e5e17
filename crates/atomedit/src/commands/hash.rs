use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use libatomedit::{RepoPath, hash_file};

use crate::{
    output::Output,
    ui::{emit, print_json},
};

/// Run the `atomedit hash` command logic.
///
/// Missing files hash to the absent sentinel, which is itself a valid
/// precondition meaning "must not exist".
pub fn hash(root: &Path, output: &dyn Output, paths: &[String], json: bool) -> Result<()> {
    let mut hashes = BTreeMap::new();
    for raw in paths {
        let path = RepoPath::parse(raw).with_context(|| format!("Invalid path '{raw}'"))?;
        let hash = hash_file(&path.to_path(root))
            .with_context(|| format!("Failed to hash {path}"))?;
        hashes.insert(path.to_string(), hash);
    }

    if json {
        return print_json(&hashes);
    }
    for (path, hash) in &hashes {
        emit(output.item(path, hash.as_str()))?;
    }
    Ok(())
}
