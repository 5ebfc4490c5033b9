//! Locating edit targets.
//!
//! Strategies run in order from strictest to loosest. The first strategy that
//! finds anything decides the outcome: exactly one occurrence is a match, more
//! than one is ambiguous. Looser strategies compare normalized copies of both
//! texts and map the hit back to byte offsets in the original content.

use crate::path::is_special_unicode_space;
use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    TrailingWhitespace,
    Unicode,
    TrailingWhitespaceUnicode,
}

impl MatchStrategy {
    /// Every strategy, strictest first.
    pub const ALL: [Self; 4] = [
        Self::Exact,
        Self::TrailingWhitespace,
        Self::Unicode,
        Self::TrailingWhitespaceUnicode,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::TrailingWhitespace => "trailing_whitespace",
            Self::Unicode => "unicode",
            Self::TrailingWhitespaceUnicode => "trailing_whitespace_unicode",
        }
    }

    const fn trims_trailing_whitespace(self) -> bool {
        matches!(self, Self::TrailingWhitespace | Self::TrailingWhitespaceUnicode)
    }

    const fn folds_unicode(self) -> bool {
        matches!(self, Self::Unicode | Self::TrailingWhitespaceUnicode)
    }

    /// All (possibly overlapping) occurrences of `needle` in `content`, as
    /// byte ranges of `content`.
    pub fn find_all(self, content: &str, needle: &str) -> Vec<Range<usize>> {
        if self == Self::Exact {
            return find_overlapping(content, needle)
                .into_iter()
                .map(|start| start..start + needle.len())
                .collect();
        }

        let trim = self.trims_trailing_whitespace();
        let fold = self.folds_unicode();
        let haystack = NormalizedText::build(content, trim, fold);
        let needle = NormalizedText::build(needle, trim, fold).text;
        find_overlapping(&haystack.text, &needle)
            .into_iter()
            .map(|start| haystack.original_range(start..start + needle.len()))
            .collect()
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unique occurrence of the edit target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub range: Range<usize>,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    NotFound,
    Ambiguous {
        occurrences: usize,
        strategy: MatchStrategy,
    },
}

/// Find the single occurrence of `needle` in `content`.
pub fn find_unique_match(content: &str, needle: &str) -> Result<TextMatch, MatchFailure> {
    if needle.is_empty() {
        return Err(MatchFailure::NotFound);
    }

    for strategy in MatchStrategy::ALL {
        let mut hits = strategy.find_all(content, needle);
        match hits.len() {
            0 => {}
            1 => {
                let range = hits.pop().unwrap_or_default();
                return Ok(TextMatch { range, strategy });
            }
            occurrences => {
                return Err(MatchFailure::Ambiguous {
                    occurrences,
                    strategy,
                });
            }
        }
    }

    Err(MatchFailure::NotFound)
}

/// Start offsets of every occurrence, advancing one character after each hit.
fn find_overlapping(haystack: &str, needle: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    if needle.is_empty() {
        return starts;
    }

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let at = from + pos;
        starts.push(at);
        from = at + haystack[at..].chars().next().map_or(1, char::len_utf8);
        if from >= haystack.len() {
            break;
        }
    }
    starts
}

fn fold_char(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
        '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
        c if is_special_unicode_space(c) => ' ',
        c => c,
    }
}

/// Normalized text plus, for each of its bytes, the byte offset in the source.
/// The mapping carries one extra entry for the end of the source.
struct NormalizedText {
    text: String,
    mapping: Vec<usize>,
}

impl NormalizedText {
    fn build(content: &str, trim_trailing: bool, fold_unicode: bool) -> Self {
        let mut text = String::with_capacity(content.len());
        let mut mapping = Vec::with_capacity(content.len() + 1);
        let mut line_start = 0;

        for (idx, line) in content.split('\n').enumerate() {
            if idx > 0 {
                text.push('\n');
                mapping.push(line_start - 1);
            }

            let kept = if trim_trailing {
                line.trim_end().len()
            } else {
                line.len()
            };
            for (offset, c) in line[..kept].char_indices() {
                let c = if fold_unicode { fold_char(c) } else { c };
                text.push(c);
                mapping.extend(std::iter::repeat_n(line_start + offset, c.len_utf8()));
            }

            line_start += line.len() + 1;
        }
        mapping.push(content.len());

        Self { text, mapping }
    }

    fn original_range(&self, range: Range<usize>) -> Range<usize> {
        self.mapping[range.start]..self.mapping[range.end]
    }
}
