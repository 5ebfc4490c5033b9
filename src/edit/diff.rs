//! Unified diff rendering for edit results.

use similar::{DiffTag, TextDiff};

/// Lines of unchanged context around each hunk.
pub const CONTEXT_LINES: usize = 3;

/// Unified diff of two LF texts with generic `original`/`modified` headers.
pub fn generate_diff(old: &str, new: &str) -> String {
    generate_diff_with_paths(old, new, "original", "modified")
}

/// Unified diff of two LF texts with the given header labels.
///
/// Identical inputs produce an empty string.
pub fn generate_diff_with_paths(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(old_label, new_label)
        .to_string()
}

/// 1-based line number, in the new text, of the first change.
pub fn first_changed_line(old: &str, new: &str) -> Option<usize> {
    TextDiff::from_lines(old, new)
        .ops()
        .iter()
        .find(|op| op.tag() != DiffTag::Equal)
        .map(|op| op.new_range().start + 1)
}
