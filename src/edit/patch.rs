//! Unified diff parsing and application.

use super::{EditResult, FileEncoding, generate_diff_with_paths, read_existing, write_atomic};
use crate::error::{Error, Result};
use crate::truncate::split_lines;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Context,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub text: String,
}

/// A single hunk in a unified diff. Line numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Lines the file must contain for the hunk to apply.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.kind != DiffLineKind::Add)
            .map(|line| line.text.as_str())
            .collect()
    }

    /// Lines that replace [`Self::old_lines`].
    pub fn new_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|line| line.kind != DiffLineKind::Remove)
            .map(|line| line.text.clone())
            .collect()
    }

    fn side_counts(&self) -> (usize, usize) {
        self.lines.iter().fold((0, 0), |(old, new), line| match line.kind {
            DiffLineKind::Context => (old + 1, new + 1),
            DiffLineKind::Remove => (old + 1, new),
            DiffLineKind::Add => (old, new + 1),
        })
    }

    fn is_complete(&self) -> bool {
        let (old, new) = self.side_counts();
        old >= self.old_count && new >= self.new_count
    }

    /// Drop blank context lines past the declared counts (editors and models
    /// often leave a trailing empty line after the last hunk).
    fn finish(mut self) -> Self {
        while let Some(last) = self.lines.last() {
            let (old, new) = self.side_counts();
            let surplus = old > self.old_count && new > self.new_count;
            if surplus && last.kind == DiffLineKind::Context && last.text.is_empty() {
                self.lines.pop();
            } else {
                break;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// How many lines away from its stated position a hunk may be found.
    pub fuzz: usize,
}

fn parse_count(caps: &regex::Captures<'_>, idx: usize, default: usize) -> Result<usize> {
    caps.get(idx).map_or(Ok(default), |m| {
        m.as_str()
            .parse()
            .map_err(|_| Error::validation(format!("Invalid hunk header number: {}", m.as_str())))
    })
}

/// Parse the hunks of a unified diff. File headers and other preamble are
/// skipped; only the first file's hunks are meaningful to the caller.
pub fn parse_unified_diff(text: &str) -> Result<Vec<DiffHunk>> {
    let mut hunks = Vec::new();
    let mut current: Option<DiffHunk> = None;

    for raw in text.lines() {
        if let Some(caps) = HUNK_HEADER.captures(raw) {
            if let Some(hunk) = current.take() {
                hunks.push(hunk.finish());
            }
            current = Some(DiffHunk {
                old_start: parse_count(&caps, 1, 0)?,
                old_count: parse_count(&caps, 2, 1)?,
                new_start: parse_count(&caps, 3, 0)?,
                new_count: parse_count(&caps, 4, 1)?,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if raw.starts_with('\\') {
            continue;
        }

        let complete = hunk.is_complete();
        let is_file_header = raw.starts_with("diff ")
            || raw.starts_with("index ")
            || raw.starts_with("--- ")
            || raw.starts_with("+++ ");
        if complete && is_file_header {
            if let Some(hunk) = current.take() {
                hunks.push(hunk.finish());
            }
            continue;
        }

        let (kind, body) = match raw.as_bytes().first() {
            Some(b'+') => (DiffLineKind::Add, &raw[1..]),
            Some(b'-') => (DiffLineKind::Remove, &raw[1..]),
            Some(b' ') => (DiffLineKind::Context, &raw[1..]),
            // Unprefixed lines after the declared counts are trailing prose.
            _ if complete => continue,
            _ => (DiffLineKind::Context, raw),
        };
        hunk.lines.push(DiffLine {
            kind,
            text: body.to_string(),
        });
    }

    if let Some(hunk) = current.take() {
        hunks.push(hunk.finish());
    }

    if hunks.is_empty() {
        return Err(Error::validation("No hunks found in diff"));
    }
    Ok(hunks)
}

fn to_isize(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

fn matches_at(lines: &[String], old_lines: &[&str], pos: usize) -> bool {
    lines.get(pos..).is_some_and(|rest| {
        old_lines.len() <= rest.len()
            && old_lines
                .iter()
                .zip(rest)
                .all(|(expected, actual)| expected.trim_end() == actual.trim_end())
    })
}

fn find_position(lines: &[String], old_lines: &[&str], expected: usize, fuzz: usize) -> Option<usize> {
    if matches_at(lines, old_lines, expected) {
        return Some(expected);
    }
    // No candidate lies further than the file is long.
    for distance in 1..=fuzz.min(lines.len()) {
        let before = expected.checked_sub(distance);
        if let Some(pos) = before.filter(|&pos| matches_at(lines, old_lines, pos)) {
            return Some(pos);
        }
        let after = expected.checked_add(distance).filter(|&pos| pos <= lines.len());
        if let Some(pos) = after.filter(|&pos| matches_at(lines, old_lines, pos)) {
            return Some(pos);
        }
        if before.is_none() && after.is_none() {
            break;
        }
    }
    None
}

fn conflict(lines: &[String], old_lines: &[&str], expected: usize, hunk_number: usize) -> Error {
    let mismatch = old_lines.iter().enumerate().find_map(|(i, want)| {
        let got = expected.checked_add(i).and_then(|at| lines.get(at)).map(String::as_str);
        (got.map(str::trim_end) != Some(want.trim_end())).then(|| (i, *want, got))
    });
    let (index, want, got) = mismatch.unwrap_or((0, old_lines.first().copied().unwrap_or(""), None));
    Error::PatchConflict {
        hunk: hunk_number,
        line: expected.saturating_add(index).saturating_add(1),
        expected: want.to_string(),
        actual: got.unwrap_or("<end of file>").to_string(),
    }
}

fn beyond_end(old_lines: &[&str], old_start: usize, hunk_number: usize) -> Error {
    Error::PatchConflict {
        hunk: hunk_number,
        line: old_start,
        expected: old_lines.first().copied().unwrap_or("").to_string(),
        actual: "<end of file>".to_string(),
    }
}

/// Apply hunks in order. On failure returns the error and how many hunks
/// had been applied; `lines` is then in an intermediate state.
fn apply_hunks(
    lines: &mut Vec<String>,
    hunks: &[DiffHunk],
    fuzz: usize,
) -> std::result::Result<(), (Error, usize)> {
    let mut offset: isize = 0;

    for (idx, hunk) in hunks.iter().enumerate() {
        let old_lines = hunk.old_lines();
        let new_lines = hunk.new_lines();

        // A pure insertion with count 0 inserts after line `old_start`.
        let anchor = if hunk.old_count == 0 && old_lines.is_empty() {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let Some(shifted) = to_isize(anchor).checked_add(offset) else {
            return Err((beyond_end(&old_lines, hunk.old_start, idx + 1), idx));
        };
        let expected = usize::try_from(shifted.max(0)).unwrap_or(0);

        let Some(pos) = find_position(lines, &old_lines, expected, fuzz) else {
            return Err((conflict(lines, &old_lines, expected, idx + 1), idx));
        };
        if pos != expected {
            tracing::debug!(hunk = idx + 1, expected, found = pos, "Hunk applied with fuzz");
        }

        let delta = to_isize(new_lines.len()) - to_isize(old_lines.len());
        lines.splice(pos..pos + old_lines.len(), new_lines);
        offset = (to_isize(pos) - to_isize(anchor)).saturating_add(delta);
    }

    Ok(())
}

/// Apply a unified diff to `original`, preserving its BOM, line endings and
/// trailing newline. The result carries the patched text on success; on
/// failure nothing of the partial application is returned.
pub fn apply_diff(original: &str, diff_text: &str, options: ApplyOptions) -> EditResult {
    let hunks = match parse_unified_diff(diff_text) {
        Ok(hunks) => hunks,
        Err(err) => return EditResult::failed(&err),
    };

    let (encoding, text) = FileEncoding::detect_str(original);
    let trailing_newline = text.is_empty() || text.ends_with('\n');
    let mut lines: Vec<String> = split_lines(&text).into_iter().map(str::to_string).collect();

    if let Err((err, applied)) = apply_hunks(&mut lines, &hunks, options.fuzz) {
        tracing::debug!(error = %err, applied, total = hunks.len(), "Patch rejected");
        return EditResult {
            hunks_applied: applied,
            hunks_failed: hunks.len() - applied,
            ..EditResult::failed(&err)
        };
    }

    let mut patched = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        patched.push('\n');
    }

    EditResult {
        success: true,
        hunks_applied: hunks.len(),
        diff: Some(generate_diff_with_paths(&text, &patched, "a", "b")),
        first_changed_line: super::first_changed_line(&text, &patched),
        content: Some(encoding.restore(&patched)),
        ..EditResult::default()
    }
}

/// Read `path`, apply `diff_text`, and write the result back atomically.
pub fn apply_diff_to_file(path: &Path, diff_text: &str, options: ApplyOptions) -> EditResult {
    apply_diff_to_file_labeled(path, &path.display().to_string(), diff_text, options)
}

pub(crate) fn apply_diff_to_file_labeled(
    path: &Path,
    label: &str,
    diff_text: &str,
    options: ApplyOptions,
) -> EditResult {
    let original = match read_existing(path, label).and_then(|raw| {
        String::from_utf8(raw).map_err(|e| {
            Error::validation(format!(
                "File is not valid UTF-8 (invalid byte at offset {}); refusing to patch it",
                e.utf8_error().valid_up_to()
            ))
        })
    }) {
        Ok(original) => original,
        Err(err) => return EditResult::failed(&err),
    };

    let mut result = apply_diff(&original, diff_text, options);
    if let Some(content) = result.content.as_deref().filter(|_| result.success) {
        if let Err(err) = write_atomic(path, content.as_bytes()) {
            return EditResult::failed(&err);
        }
        tracing::debug!(path = %label, hunks = result.hunks_applied, "Patch written");
    }
    if let Some(diff) = result.diff.as_mut() {
        *diff = relabel_headers(diff, label);
    }
    result
}

fn relabel_headers(diff: &str, label: &str) -> String {
    diff.strip_prefix("--- a\n+++ b\n").map_or_else(
        || diff.to_string(),
        |body| format!("--- a/{label}\n+++ b/{label}\n{body}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEN: &str = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n";

    #[test]
    fn parses_headers_and_lines() {
        let diff = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n\\ No newline at end of file\n";
        let hunks = parse_unified_diff(diff).unwrap();
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert_eq!((hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count), (1, 2, 1, 2));
        assert_eq!(hunk.old_lines(), vec!["a", "b"]);
        assert_eq!(hunk.new_lines(), vec!["a".to_string(), "B".to_string()]);
    }

    #[test]
    fn counts_default_to_one() {
        let hunks = parse_unified_diff("@@ -3 +3 @@\n-x\n+y\n").unwrap();
        assert_eq!(hunks[0].old_count, 1);
        assert_eq!(hunks[0].new_count, 1);
    }

    #[test]
    fn trailing_blank_context_is_dropped() {
        let hunks = parse_unified_diff("@@ -1,1 +1,1 @@\n-a\n+b\n\n").unwrap();
        assert_eq!(hunks[0].lines.len(), 2);
    }

    #[test]
    fn no_hunks_is_validation_error() {
        let err = parse_unified_diff("just some text").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn multi_hunk_tracks_offset() {
        let diff = "@@ -1,2 +1,3 @@\n 1\n+1.5\n 2\n@@ -8,2 +9,2 @@\n 8\n-9\n+nine\n";
        let result = apply_diff(TEN, diff, ApplyOptions::default());
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.hunks_applied, 2);
        assert_eq!(
            result.content.unwrap(),
            "1\n1.5\n2\n3\n4\n5\n6\n7\n8\nnine\n10\n"
        );
    }

    #[test]
    fn conflict_reports_counts_and_lines() {
        let diff = "@@ -1,1 +1,1 @@\n-1\n+one\n@@ -5,1 +5,1 @@\n-FIVE\n+five\n";
        let result = apply_diff(TEN, diff, ApplyOptions::default());
        assert!(!result.success);
        assert_eq!(result.hunks_applied, 1);
        assert_eq!(result.hunks_failed, 1);
        assert_eq!(result.error_kind, Some("patch_conflict"));
        let message = result.error.unwrap();
        assert!(message.contains("Hunk 2"), "{message}");
        assert!(message.contains("\"FIVE\""), "{message}");
        assert!(message.contains("\"5\""), "{message}");
        assert!(result.content.is_none());
    }

    #[test]
    fn fuzz_finds_shifted_hunk() {
        let diff = "@@ -3,1 +3,1 @@\n-5\n+five\n";
        let strict = apply_diff(TEN, diff, ApplyOptions::default());
        assert!(!strict.success);

        let fuzzy = apply_diff(TEN, diff, ApplyOptions { fuzz: 2 });
        assert!(fuzzy.success, "{:?}", fuzzy.error);
        assert!(fuzzy.content.unwrap().contains("4\nfive\n6"));
    }

    #[test]
    fn unbounded_fuzz_gives_up_at_file_bounds() {
        let result = apply_diff("a\nb\n", "@@ -1,1 +1,1 @@\n-zzz\n+q\n", ApplyOptions { fuzz: usize::MAX });
        assert!(!result.success);
        assert_eq!(result.error_kind, Some("patch_conflict"));
        assert_eq!(result.hunks_failed, 1);
    }

    #[test]
    fn fuzz_reaches_last_and_first_lines() {
        let tail = apply_diff(TEN, "@@ -7,1 +7,1 @@\n-10\n+ten\n", ApplyOptions { fuzz: 3 });
        assert!(tail.success, "{:?}", tail.error);
        assert!(tail.content.unwrap().ends_with("9\nten\n"));

        let head = apply_diff(TEN, "@@ -4,1 +4,1 @@\n-1\n+one\n", ApplyOptions { fuzz: 3 });
        assert!(head.success, "{:?}", head.error);
        assert!(head.content.unwrap().starts_with("one\n2\n"));

        let short = apply_diff(TEN, "@@ -7,1 +7,1 @@\n-10\n+ten\n", ApplyOptions { fuzz: 2 });
        assert!(!short.success);
    }

    #[test]
    fn header_past_end_of_file_is_a_conflict() {
        let result = apply_diff("a\nb\n", "@@ -40,1 +40,1 @@\n-b\n+c\n", ApplyOptions { fuzz: 5 });
        assert!(!result.success);
        assert_eq!(result.error_kind, Some("patch_conflict"));
        let message = result.error.unwrap();
        assert!(message.contains("<end of file>"), "{message}");
    }

    #[test]
    fn huge_header_after_growing_hunk_is_a_conflict() {
        let diff = "@@ -1,1 +1,2 @@\n a\n+x\n@@ -9223372036854775808,1 +1,1 @@\n-b\n+c\n";
        let result = apply_diff("a\nb\n", diff, ApplyOptions { fuzz: usize::MAX });
        assert!(!result.success);
        assert_eq!(result.hunks_applied, 1);
        assert_eq!(result.hunks_failed, 1);
        assert_eq!(result.error_kind, Some("patch_conflict"));
        assert!(result.content.is_none());
    }

    #[test]
    fn pure_insertion_after_line() {
        let result = apply_diff("a\nb\n", "@@ -1,0 +2,1 @@\n+inserted\n", ApplyOptions::default());
        assert_eq!(result.content.unwrap(), "a\ninserted\nb\n");
    }

    #[test]
    fn crlf_bom_and_missing_newline_preserved() {
        let original = "\u{FEFF}x\r\ny\r\nz";
        let result = apply_diff(original, "@@ -2,1 +2,1 @@\n-y\n+Y\n", ApplyOptions::default());
        assert_eq!(result.content.unwrap(), "\u{FEFF}x\r\nY\r\nz");
    }

    #[test]
    fn generated_diff_applies_back() {
        let old = "fn main() {\n    println!(\"hi\");\n}\n";
        let new = "fn main() {\n    println!(\"hello\");\n    return;\n}\n";
        let diff = super::super::generate_diff(old, new);
        let result = apply_diff(old, &diff, ApplyOptions::default());
        assert_eq!(result.content.as_deref(), Some(new));
    }

    #[test]
    fn file_patch_writes_and_labels_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "keep\nold\n").unwrap();

        let result = apply_diff_to_file_labeled(
            &path,
            "notes.txt",
            "@@ -1,2 +1,2 @@\n keep\n-old\n+new\n",
            ApplyOptions::default(),
        );
        assert!(result.success);
        assert!(result.diff.unwrap().starts_with("--- a/notes.txt\n+++ b/notes.txt\n"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep\nnew\n");
    }

    #[test]
    fn failed_file_patch_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        let result = apply_diff_to_file(&path, "@@ -1,1 +1,1 @@\n-zzz\n+q\n", ApplyOptions::default());
        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}
