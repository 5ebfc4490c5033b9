//! Byte-level conventions of a text file: UTF-8 BOM and line endings.
//!
//! Matching always happens on BOM-less, LF-only text; [`FileEncoding::restore`]
//! puts the original conventions back before the file is written.

use crate::error::{Error, Result};
use serde::Serialize;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    CrLf,
}

/// Conventions detected on the way in and restored on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEncoding {
    pub has_bom: bool,
    pub line_ending: LineEnding,
}

impl Default for FileEncoding {
    fn default() -> Self {
        Self {
            has_bom: false,
            line_ending: LineEnding::Lf,
        }
    }
}

impl FileEncoding {
    /// Decode raw file bytes into LF-normalized text without BOM.
    ///
    /// Non-UTF-8 input is rejected: rewriting it through a lossy decode would
    /// corrupt every byte we could not represent.
    pub fn detect(bytes: &[u8]) -> Result<(Self, String)> {
        let (has_bom, body) = bytes
            .strip_prefix(UTF8_BOM)
            .map_or((false, bytes), |rest| (true, rest));
        let text = std::str::from_utf8(body).map_err(|e| {
            Error::validation(format!(
                "File is not valid UTF-8 (invalid byte at offset {}); refusing to edit it",
                e.valid_up_to() + if has_bom { UTF8_BOM.len() } else { 0 }
            ))
        })?;

        let line_ending = detect_line_ending(text);
        let text = match line_ending {
            LineEnding::CrLf => normalize_to_lf(text),
            LineEnding::Lf => text.to_string(),
        };

        Ok((
            Self {
                has_bom,
                line_ending,
            },
            text,
        ))
    }

    /// Decode text that is already a `str` (BOM may appear as U+FEFF).
    pub fn detect_str(text: &str) -> (Self, String) {
        let (has_bom, body) = text
            .strip_prefix('\u{FEFF}')
            .map_or((false, text), |rest| (true, rest));
        let line_ending = detect_line_ending(body);
        let body = match line_ending {
            LineEnding::CrLf => normalize_to_lf(body),
            LineEnding::Lf => body.to_string(),
        };
        (
            Self {
                has_bom,
                line_ending,
            },
            body,
        )
    }

    /// Re-apply line endings and BOM to LF text.
    pub fn restore(&self, text: &str) -> String {
        let body = match self.line_ending {
            LineEnding::CrLf => text.replace('\n', "\r\n"),
            LineEnding::Lf => text.to_string(),
        };
        if self.has_bom {
            format!("\u{FEFF}{body}")
        } else {
            body
        }
    }
}

/// Line ending of the first line break in `content`.
pub fn detect_line_ending(content: &str) -> LineEnding {
    match content.find('\n') {
        Some(idx) if idx > 0 && content.as_bytes()[idx - 1] == b'\r' => LineEnding::CrLf,
        _ => LineEnding::Lf,
    }
}

/// Collapse CRLF pairs to LF. Lone `\r` bytes are content and stay.
pub fn normalize_to_lf(text: &str) -> String {
    text.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_crlf_from_first_break() {
        assert_eq!(detect_line_ending("a\r\nb\nc"), LineEnding::CrLf);
        assert_eq!(detect_line_ending("a\nb\r\nc"), LineEnding::Lf);
        assert_eq!(detect_line_ending("no breaks"), LineEnding::Lf);
    }

    #[test]
    fn bom_and_crlf_round_trip() {
        let raw = b"\xEF\xBB\xBFone\r\ntwo\r\n";
        let (encoding, text) = FileEncoding::detect(raw).unwrap();
        assert!(encoding.has_bom);
        assert_eq!(encoding.line_ending, LineEnding::CrLf);
        assert_eq!(text, "one\ntwo\n");
        assert_eq!(encoding.restore(&text).as_bytes(), raw);
    }

    #[test]
    fn lone_carriage_returns_survive_lf_files() {
        let raw = b"progress\r50%\nnext\n";
        let (encoding, text) = FileEncoding::detect(raw).unwrap();
        assert_eq!(encoding.line_ending, LineEnding::Lf);
        assert_eq!(encoding.restore(&text).as_bytes(), raw);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = FileEncoding::detect(b"ok\xFFbad").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("offset 2"));
    }

    #[test]
    fn detect_str_strips_bom_char() {
        let (encoding, text) = FileEncoding::detect_str("\u{FEFF}x\r\n");
        assert!(encoding.has_bom);
        assert_eq!(text, "x\n");
    }
}
