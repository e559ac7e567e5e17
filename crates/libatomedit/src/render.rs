use std::{result, str};

use crate::{
    config::LineEnding,
    error::{MutationError, Result},
    path::RepoPath,
    types::{Change, Patch},
};

/// Maximum number of match locations reported when an exact patch is ambiguous.
const MAX_REPORTED_MATCHES: usize = 10;

/// Convert every line terminator in `text` to `ending`.
pub fn normalize(text: &str, ending: LineEnding) -> String {
    let lf = text.replace("\r\n", "\n").replace('\r', "\n");
    match ending {
        LineEnding::Lf => lf,
        LineEnding::Crlf => lf.replace('\n', "\r\n"),
    }
}

/// Produce the bytes a file should hold after `change` is applied to `current`.
///
/// Patches operate on LF-normalized text; the result is converted to `ending`.
pub fn render(
    path: &RepoPath,
    current: Option<&[u8]>,
    change: Change<'_>,
    ending: LineEnding,
) -> Result<Vec<u8>> {
    let text = match change {
        Change::Replace(content) => content.to_string(),
        Change::Patches(patches) => {
            let bytes = current.ok_or_else(|| rejected(path, "file does not exist"))?;
            let original =
                str::from_utf8(bytes).map_err(|_| rejected(path, "file is not valid UTF-8"))?;
            let mut text = normalize(original, LineEnding::Lf);
            for (n, patch) in patches.iter().enumerate() {
                text = apply_patch(&text, patch)
                    .map_err(|reason| rejected(path, format!("patch {}: {reason}", n + 1)))?;
            }
            text
        }
    };
    Ok(normalize(&text, ending).into_bytes())
}

/// Build a [`MutationError::PatchRejected`] for `path`.
fn rejected(path: &RepoPath, reason: impl Into<String>) -> MutationError {
    MutationError::PatchRejected {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Apply one patch to LF-normalized text.
fn apply_patch(text: &str, patch: &Patch) -> result::Result<String, String> {
    match patch {
        Patch::Lines {
            start,
            end,
            content,
        } => replace_lines(text, *start, *end, &normalize(content, LineEnding::Lf)),
        Patch::Exact {
            old,
            new,
            occurrences,
        } => replace_exact(
            text,
            &normalize(old, LineEnding::Lf),
            &normalize(new, LineEnding::Lf),
            *occurrences,
        ),
    }
}

/// Replace the 1-based inclusive range `start..=end` with `content`.
fn replace_lines(
    text: &str,
    start: usize,
    end: usize,
    content: &str,
) -> result::Result<String, String> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let count = lines.len();
    if start == 0 || start > count + 1 {
        return Err(format!(
            "start line {start} is outside 1..={} for a {count}-line file",
            count + 1
        ));
    }
    if end.saturating_add(1) < start || end > count {
        return Err(format!("end line {end} is invalid for start line {start}"));
    }

    let mut out: String = lines[..start - 1].concat();
    if !content.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(content);
        if end < count && !content.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(&lines[end..].concat());
    Ok(out)
}

/// Replace every occurrence of `old` with `new`, requiring exactly `expected` matches.
fn replace_exact(
    text: &str,
    old: &str,
    new: &str,
    expected: usize,
) -> result::Result<String, String> {
    if old.is_empty() {
        return Err("old text is empty".to_string());
    }
    let lines: Vec<usize> = text
        .match_indices(old)
        .map(|(idx, _)| text[..idx].matches('\n').count() + 1)
        .collect();
    if lines.is_empty() {
        return Err("content not found".to_string());
    }
    if lines.len() != expected {
        let shown: Vec<String> = lines
            .iter()
            .take(MAX_REPORTED_MATCHES)
            .map(ToString::to_string)
            .collect();
        return Err(format!(
            "expected {expected} occurrence(s), found {} at line(s) {}",
            lines.len(),
            shown.join(", ")
        ));
    }
    Ok(text.replace(old, new))
}
