use std::result::Result as StdResult;

use anyhow::Result;
use libatomedit::{
    DeltaAction, FileDelta, MutationError, MutationResult, ValidationResult, Violation,
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::output::{Output, OutputError};

/// A batch that failed `validate`; carries the exit code of its first violation.
#[derive(Debug, Error)]
#[error("{count} violation(s) found")]
pub struct ValidationFailed {
    /// Number of violations reported.
    pub count: usize,
    /// Process exit code.
    pub code: i32,
}

impl ValidationFailed {
    /// Summarize a failed validation.
    pub fn new(result: &ValidationResult) -> Self {
        let code = match result.violations.first() {
            Some(Violation::ScopeViolation { .. }) => 3,
            Some(Violation::PreconditionFailed { .. }) => 4,
            _ => 2,
        };
        Self {
            count: result.violations.len(),
            code,
        }
    }
}

/// Emit an output result, mapping errors into `anyhow`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result?;
    Ok(())
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Machine-readable form of a failed command.
pub fn error_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<MutationError>() {
        Some(mutation) => {
            let mut value = json!({
                "kind": mutation.kind(),
                "message": mutation.to_string(),
                "retryable": mutation.is_retryable(),
            });
            match mutation {
                MutationError::ScopeViolation { paths } => value["paths"] = json!(paths),
                MutationError::ApplyFailure {
                    rollback_errors, ..
                } if !rollback_errors.is_empty() => {
                    value["rollback_errors"] = json!(rollback_errors);
                }
                _ => {}
            }
            json!({ "error": value })
        }
        None => json!({
            "error": {
                "kind": "error",
                "message": format!("{err:#}"),
                "retryable": false,
            }
        }),
    }
}

/// Past-tense label for a delta action.
fn action_label(action: DeltaAction) -> &'static str {
    match action {
        DeltaAction::Created => "created",
        DeltaAction::Updated => "updated",
        DeltaAction::Deleted => "deleted",
        DeltaAction::Moved => "moved",
    }
}

/// One-line description of a file delta.
fn describe(file: &FileDelta) -> String {
    match &file.destination {
        Some(destination) => format!("{} {} -> {destination}", action_label(file.action), file.path),
        None => format!("{} {}", action_label(file.action), file.path),
    }
}

/// Render the outcome of `apply`.
pub fn render_result(output: &dyn Output, result: &MutationResult) -> Result<()> {
    let header = if result.dry_run {
        format!("dry run {}", result.mutation_id)
    } else {
        format!("mutation {}", result.mutation_id)
    };
    let section = output.section(&header);

    for file in &result.delta.files {
        emit(section.diff_stat(&describe(file), file.insertions, file.deletions))?;
    }
    for preview in &result.previews {
        emit(section.diff(&preview.unified_diff))?;
    }
    if !result.affected_symbols.is_empty() {
        emit(section.item("symbols", &result.affected_symbols.join(", ")))?;
    }
    if !result.affected_tests.is_empty() {
        emit(section.item("tests", &result.affected_tests.join(", ")))?;
    }
    emit(section.item("fingerprint", &result.repo_fingerprint))?;

    let summary = format!(
        "{} file(s) changed, +{} -{}",
        result.delta.files_changed, result.delta.insertions, result.delta.deletions
    );
    if result.applied {
        emit(section.success(&summary))?;
    } else {
        emit(section.message(&format!("would apply: {summary}")))?;
    }
    Ok(())
}

/// Human-readable form of one violation.
fn violation_message(violation: &Violation) -> String {
    match violation {
        Violation::ScopeViolation { path } => format!("{path}: outside allowed scope"),
        Violation::PreconditionFailed {
            path,
            expected,
            actual,
        } => format!("{path}: expected hash {expected}, found {actual}"),
        Violation::InvalidEdit { path, reason } if path.is_empty() => reason.clone(),
        Violation::InvalidEdit { path, reason } => format!("{path}: {reason}"),
    }
}

/// Render the outcome of `validate`.
pub fn render_validation(output: &dyn Output, result: &ValidationResult) -> Result<()> {
    if result.ok {
        emit(output.success("batch is valid"))?;
        return Ok(());
    }
    for violation in &result.violations {
        emit(output.warn(&violation_message(violation)))?;
    }
    Ok(())
}
