//! Diff/fuzzy-match edit engine.
//!
//! Edits operate on LF-normalized, BOM-less text. The original file's
//! conventions are captured by [`FileEncoding`] and restored on write so that
//! a CRLF file stays CRLF and a BOM survives.

pub mod diff;
pub mod encoding;
pub mod fuzzy;
pub mod patch;

pub use diff::{first_changed_line, generate_diff, generate_diff_with_paths};
pub use encoding::{FileEncoding, LineEnding};
pub use fuzzy::{MatchFailure, MatchStrategy, TextMatch, find_unique_match};
pub use patch::{
    ApplyOptions, DiffHunk, DiffLine, DiffLineKind, apply_diff, apply_diff_to_file,
    parse_unified_diff,
};

use crate::error::{Error, Result};
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

/// Outcome of an edit or patch at the tool boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    pub success: bool,
    /// New file text, only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub hunks_applied: usize,
    pub hunks_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_changed_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MatchStrategy>,
}

impl EditResult {
    pub fn failed(err: &Error) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::default()
        }
    }
}

/// A successful in-memory replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// New text with the original encoding restored, ready to write.
    pub content: String,
    pub diff: String,
    pub first_changed_line: Option<usize>,
    pub strategy: MatchStrategy,
}

/// Replace the unique occurrence of `old_text` in `raw`.
///
/// `path_label` only appears in messages and diff headers.
pub fn apply_edit(
    raw: &[u8],
    old_text: &str,
    new_text: &str,
    path_label: &str,
) -> Result<EditOutcome> {
    if old_text.is_empty() {
        return Err(Error::validation(
            "old text cannot be empty. To prepend text, include the first line's content in oldText and newText.",
        ));
    }

    let (encoding, text) = FileEncoding::detect(raw)?;
    let old_text = encoding::normalize_to_lf(old_text);
    let new_text = encoding::normalize_to_lf(new_text);

    let found = find_unique_match(&text, &old_text).map_err(|failure| match failure {
        MatchFailure::NotFound => Error::not_found(format!(
            "Could not find the exact text in {path_label}. The old text must match exactly including all whitespace and newlines."
        )),
        MatchFailure::Ambiguous { occurrences, .. } => Error::AmbiguousMatch {
            occurrences,
            path: path_label.to_string(),
        },
    })?;
    tracing::debug!(
        path = %path_label,
        strategy = %found.strategy,
        start = found.range.start,
        end = found.range.end,
        "Located edit target"
    );

    let mut updated = String::with_capacity(text.len() + new_text.len());
    updated.push_str(&text[..found.range.start]);
    updated.push_str(&new_text);
    updated.push_str(&text[found.range.end..]);

    if updated == text {
        return Err(Error::validation(format!(
            "No changes made to {path_label}. The replacement produced identical content."
        )));
    }

    Ok(EditOutcome {
        content: encoding.restore(&updated),
        diff: generate_diff_with_paths(
            &text,
            &updated,
            &format!("a/{path_label}"),
            &format!("b/{path_label}"),
        ),
        first_changed_line: first_changed_line(&text, &updated),
        strategy: found.strategy,
    })
}

/// Edit a file in place.
pub fn edit_file(path: &Path, old_text: &str, new_text: &str) -> EditResult {
    edit_file_labeled(path, &path.display().to_string(), old_text, new_text)
}

pub(crate) fn edit_file_labeled(
    path: &Path,
    label: &str,
    old_text: &str,
    new_text: &str,
) -> EditResult {
    let run = || -> Result<EditOutcome> {
        let raw = read_existing(path, label)?;
        let outcome = apply_edit(&raw, old_text, new_text, label)?;
        write_atomic(path, outcome.content.as_bytes())?;
        Ok(outcome)
    };

    match run() {
        Ok(outcome) => EditResult {
            success: true,
            content: Some(outcome.content),
            diff: Some(outcome.diff),
            first_changed_line: outcome.first_changed_line,
            strategy: Some(outcome.strategy),
            ..EditResult::default()
        },
        Err(err) => {
            tracing::debug!(path = %label, error = %err, "Edit failed");
            EditResult::failed(&err)
        }
    }
}

pub(crate) fn read_existing(path: &Path, label: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(format!("File not found: {label}"))
        } else {
            Error::from(e)
        }
    })
}

/// Write via a temp file in the same directory and rename over `path`.
///
/// Existing permissions are carried over to the replacement.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path).ok().map(|m| m.permissions());

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.persist(path).map_err(|e| Error::from(e.error))?;
    Ok(())
}
