//! Output truncation.
//!
//! Bounds a text blob to a line budget and a byte budget, keeping either the
//! head (file reads) or the tail (process output). Lines are split on `\n`;
//! a trailing newline ends the last line rather than starting an empty one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Default maximum lines for truncation.
pub const DEFAULT_MAX_LINES: usize = 2000;

/// Default maximum bytes for truncation.
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024; // 50KB

/// Line and byte budget applied to one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Default for TruncationLimits {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl TruncationLimits {
    pub const fn unlimited() -> Self {
        Self {
            max_lines: usize::MAX,
            max_bytes: usize::MAX,
        }
    }
}

/// Result of truncation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationResult {
    pub content: String,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_by: Option<TruncatedBy>,
    pub total_lines: usize,
    pub total_bytes: usize,
    pub output_lines: usize,
    pub output_bytes: usize,
    /// 1-based line to request next after a head truncation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    pub last_line_partial: bool,
    pub first_line_exceeds_limit: bool,
    /// Full size of the line the byte budget cut through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cut_line_bytes: Option<usize>,
    pub max_lines: usize,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TruncatedBy {
    Lines,
    Bytes,
}

impl TruncationResult {
    fn untouched(content: &str, total_lines: usize, max_lines: usize, max_bytes: usize) -> Self {
        Self {
            content: content.to_string(),
            truncated: false,
            truncated_by: None,
            total_lines,
            total_bytes: content.len(),
            output_lines: total_lines,
            output_bytes: content.len(),
            next_offset: None,
            last_line_partial: false,
            first_line_exceeds_limit: false,
            cut_line_bytes: None,
            max_lines,
            max_bytes,
        }
    }
}

/// Split text into lines; a single trailing `\n` does not open a new line.
pub fn split_lines(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix('\n').unwrap_or(content);
    body.split('\n').collect()
}

/// Number of lines in `content` under the [`split_lines`] model.
pub fn count_lines(content: &str) -> usize {
    if content.is_empty() {
        return 0;
    }
    let newlines = memchr::memchr_iter(b'\n', content.as_bytes()).count();
    if content.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Truncate from the beginning (keep first N lines).
///
/// Only whole lines are kept. When the byte budget is the binding limit,
/// `cut_line_bytes` holds the size of the line that did not fit.
pub fn truncate_head(content: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let lines = split_lines(content);
    let total_lines = lines.len();

    if total_lines <= max_lines && content.len() <= max_bytes {
        return TruncationResult::untouched(content, total_lines, max_lines, max_bytes);
    }

    let mut output = String::new();
    let mut line_count = 0;
    let mut byte_count: usize = 0;
    let mut truncated_by = None;
    let mut cut_line_bytes = None;

    for (i, line) in lines.iter().enumerate() {
        if i >= max_lines {
            truncated_by = Some(TruncatedBy::Lines);
            break;
        }

        let line_bytes = line.len() + usize::from(i > 0); // +1 for newline
        if byte_count + line_bytes > max_bytes {
            truncated_by = Some(TruncatedBy::Bytes);
            cut_line_bytes = Some(line.len());
            break;
        }

        if i > 0 {
            output.push('\n');
        }
        output.push_str(line);
        line_count += 1;
        byte_count += line_bytes;
    }

    // Every line fit but the trailing newline pushed us over the byte budget.
    let truncated_by = truncated_by.unwrap_or(TruncatedBy::Bytes);
    let output_bytes = output.len();

    TruncationResult {
        content: output,
        truncated: true,
        truncated_by: Some(truncated_by),
        total_lines,
        total_bytes: content.len(),
        output_lines: line_count,
        output_bytes,
        next_offset: Some(line_count + 1),
        last_line_partial: false,
        first_line_exceeds_limit: line_count == 0 && cut_line_bytes.is_some(),
        cut_line_bytes,
        max_lines,
        max_bytes,
    }
}

/// Truncate from the end (keep last N lines).
pub fn truncate_tail(content: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let lines = split_lines(content);
    let total_lines = lines.len();

    if total_lines <= max_lines && content.len() <= max_bytes {
        return TruncationResult::untouched(content, total_lines, max_lines, max_bytes);
    }

    let mut output_lines: Vec<&str> = Vec::new();
    let mut byte_count: usize = 0;
    let mut truncated_by = None;
    let mut last_line_partial = false;
    let mut cut_line_bytes = None;

    for line in lines.iter().rev() {
        if output_lines.len() >= max_lines {
            truncated_by = Some(TruncatedBy::Lines);
            break;
        }

        let line_bytes = line.len() + usize::from(!output_lines.is_empty());
        if byte_count + line_bytes > max_bytes {
            if output_lines.is_empty() && max_bytes > 0 {
                let suffix = truncate_str_to_bytes_from_end(line, max_bytes);
                if !suffix.is_empty() {
                    output_lines.push(suffix);
                    last_line_partial = true;
                }
            }
            cut_line_bytes = Some(line.len());
            truncated_by = Some(TruncatedBy::Bytes);
            break;
        }

        output_lines.push(line);
        byte_count += line_bytes;
    }

    output_lines.reverse();
    let output = output_lines.join("\n");
    let output_bytes = output.len();

    TruncationResult {
        content: output,
        truncated: true,
        truncated_by: Some(truncated_by.unwrap_or(TruncatedBy::Bytes)),
        total_lines,
        total_bytes: content.len(),
        output_lines: output_lines.len(),
        output_bytes,
        next_offset: None,
        last_line_partial,
        first_line_exceeds_limit: false,
        cut_line_bytes,
        max_lines,
        max_bytes,
    }
}

/// Longest suffix of `s` that fits in `max_bytes`, on a UTF-8 boundary.
fn truncate_str_to_bytes_from_end(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Format a byte count into a human-readable string with appropriate unit suffix.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * 1024;

    if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

// ============================================================================
// Read windows
// ============================================================================

/// A window of text selected by offset/limit and bounded by head truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutput {
    /// Selected text plus any continuation footer.
    pub text: String,
    pub truncation: TruncationResult,
    /// 1-based first line shown.
    pub start_line: usize,
    /// 1-based last line shown (`start_line - 1` when nothing fit).
    pub end_line: usize,
    pub total_lines: usize,
    /// Lines left after an explicit caller limit.
    pub remaining_lines: Option<usize>,
}

impl ReadOutput {
    pub const fn next_offset(&self) -> usize {
        self.end_line + 1
    }
}

/// Select lines `offset..offset+limit` (0-based offset) and head-truncate them.
///
/// Offsets at or past the end are reported as [`Error::OffsetBeyondEnd`]
/// carrying the exact line count; an empty text accepts offset 0.
pub fn truncate_for_read(
    content: &str,
    offset: usize,
    limit: Option<usize>,
    limits: TruncationLimits,
) -> Result<ReadOutput> {
    let lines = split_lines(content);
    let total_lines = lines.len();

    if offset >= total_lines && !(offset == 0 && total_lines == 0) {
        return Err(Error::OffsetBeyondEnd {
            offset,
            total_lines,
        });
    }

    let end = limit.map_or(total_lines, |limit| {
        offset.saturating_add(limit).min(total_lines)
    });
    let selected = lines[offset..end].join("\n");
    let truncation = truncate_head(&selected, limits.max_lines, limits.max_bytes);

    let start_line = offset + 1;
    let end_line = offset + truncation.output_lines;
    let remaining_lines = limit.and_then(|_| {
        let remaining = total_lines - end;
        (remaining > 0).then_some(remaining)
    });

    let mut text = truncation.content.clone();
    if truncation.first_line_exceeds_limit {
        text = format!(
            "[Line {start_line} is {}, exceeds {} limit]",
            format_size(truncation.cut_line_bytes.unwrap_or_default()),
            format_size(limits.max_bytes)
        );
    } else if truncation.truncated {
        let next = end_line + 1;
        if truncation.truncated_by == Some(TruncatedBy::Lines) {
            let _ = write!(
                text,
                "\n\n[Showing lines {start_line}-{end_line} of {total_lines}. Use offset={next} to continue]"
            );
        } else {
            let _ = write!(
                text,
                "\n\n[Showing lines {start_line}-{end_line} of {total_lines} ({} limit). Use offset={next} to continue]",
                format_size(limits.max_bytes)
            );
        }
    } else if let Some(remaining) = remaining_lines.filter(|_| !truncation.truncated) {
        let next = end_line + 1;
        let _ = write!(
            text,
            "\n\n[{remaining} more lines in file. Use offset={next} to continue]"
        );
    }

    Ok(ReadOutput {
        text,
        truncation,
        start_line,
        end_line,
        total_lines,
        remaining_lines,
    })
}

// ============================================================================
// Tests
// ============================================================================
