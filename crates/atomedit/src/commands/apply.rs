use std::path::Path;

use anyhow::Result;
use libatomedit::MutationEngine;
use tracing::debug;

use crate::{
    batch::Batch,
    output::Output,
    ui::{print_json, render_result},
};

/// Run the `atomedit apply` command logic.
pub fn apply(
    engine: &MutationEngine,
    output: &dyn Output,
    batch_path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let batch = Batch::load(batch_path)?;
    debug!(
        edits = batch.edits.len(),
        preconditions = batch.preconditions.len(),
        "loaded batch"
    );

    let result = engine.apply(&batch.edits, dry_run, &batch.preconditions)?;
    if json {
        print_json(&result)
    } else {
        render_result(output, &result)
    }
}
