use std::path::Path;

use anyhow::Result;
use libatomedit::MutationEngine;

use crate::{
    batch::Batch,
    output::Output,
    ui::{ValidationFailed, print_json, render_validation},
};

/// Run the `atomedit validate` command logic.
///
/// A batch with violations is reported and then fails with [`ValidationFailed`].
pub fn validate(
    engine: &MutationEngine,
    output: &dyn Output,
    batch_path: &Path,
    json: bool,
) -> Result<()> {
    let batch = Batch::load(batch_path)?;
    let result = engine.validate(&batch.edits, &batch.preconditions)?;

    if json {
        print_json(&result)?;
    } else {
        render_validation(output, &result)?;
    }

    if !result.ok {
        return Err(ValidationFailed::new(&result).into());
    }
    Ok(())
}
