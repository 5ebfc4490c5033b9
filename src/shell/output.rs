//! Bounded capture of a command's combined output.
//!
//! Only the most recent `2 × max_bytes` are kept in memory. Once the stream
//! outgrows `max_bytes` everything (from the first byte) is mirrored to a temp
//! file whose ownership passes to the caller with the result.

use crate::truncate::{TruncatedBy, TruncationLimits, TruncationResult, format_size, truncate_tail};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use uuid::Uuid;

/// Rolling buffer plus overflow file for one execution.
#[derive(Debug)]
pub struct OutputSink {
    limits: TruncationLimits,
    temp_dir: PathBuf,
    chunks: VecDeque<Vec<u8>>,
    chunks_bytes: usize,
    max_chunks_bytes: usize,
    total_bytes: usize,
    newlines: usize,
    ends_with_newline: bool,
    current_line_bytes: usize,
    last_complete_line_bytes: usize,
    temp_file: Option<tokio::fs::File>,
    temp_file_path: Option<PathBuf>,
}

/// What the sink holds once the process is done.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub truncation: TruncationResult,
    pub full_output_path: Option<PathBuf>,
}

impl OutputSink {
    pub fn new(limits: TruncationLimits, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            limits,
            temp_dir: temp_dir.into(),
            chunks: VecDeque::new(),
            chunks_bytes: 0,
            max_chunks_bytes: limits.max_bytes.saturating_mul(2),
            total_bytes: 0,
            newlines: 0,
            ends_with_newline: false,
            current_line_bytes: 0,
            last_complete_line_bytes: 0,
            temp_file: None,
            temp_file_path: None,
        }
    }

    pub const fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Lines in the whole stream, not just the buffered tail.
    pub const fn total_lines(&self) -> usize {
        if self.total_bytes == 0 {
            0
        } else if self.ends_with_newline {
            self.newlines
        } else {
            self.newlines + 1
        }
    }

    pub fn full_output_path(&self) -> Option<&Path> {
        self.temp_file_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Append a chunk in arrival order.
    pub async fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.count(chunk);

        if self.total_bytes > self.limits.max_bytes && self.temp_file_path.is_none() {
            self.open_overflow_file().await;
        }

        if let Some(file) = self.temp_file.as_mut() {
            if let Err(err) = file.write_all(chunk).await {
                tracing::warn!(error = %err, "Failed to write overflow log; full output will be incomplete");
                self.temp_file = None;
            }
        }

        self.chunks.push_back(chunk.to_vec());
        self.chunks_bytes = self.chunks_bytes.saturating_add(chunk.len());
        self.evict();
    }

    /// Drop bytes from the front until the buffer fits its budget. A partly
    /// dropped chunk is cut forward to the next UTF-8 character boundary.
    fn evict(&mut self) {
        while self.chunks_bytes > self.max_chunks_bytes {
            let excess = self.chunks_bytes - self.max_chunks_bytes;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= excess {
                self.chunks_bytes -= front.len();
                self.chunks.pop_front();
                continue;
            }
            let cut = front[excess..]
                .iter()
                .position(|&byte| !is_continuation_byte(byte))
                .map_or(front.len(), |skip| excess + skip);
            front.drain(..cut);
            self.chunks_bytes -= cut;
        }
    }

    fn count(&mut self, chunk: &[u8]) {
        self.total_bytes = self.total_bytes.saturating_add(chunk.len());
        let mut segment_start = 0;
        for idx in memchr::memchr_iter(b'\n', chunk) {
            self.newlines += 1;
            self.last_complete_line_bytes = self.current_line_bytes + (idx - segment_start);
            self.current_line_bytes = 0;
            segment_start = idx + 1;
        }
        self.current_line_bytes += chunk.len() - segment_start;
        self.ends_with_newline = chunk.last() == Some(&b'\n');
    }

    async fn open_overflow_file(&mut self) {
        let id = Uuid::new_v4().simple().to_string();
        let path = self.temp_dir.join(format!("pi-bash-{}.log", &id[..16]));

        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to create overflow log");
                // Do not retry on every chunk.
                self.temp_file_path = Some(PathBuf::new());
                return;
            }
        };

        // Seed with what is still buffered so the file starts at the first byte.
        for existing in &self.chunks {
            if let Err(err) = file.write_all(existing).await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to seed overflow log");
                break;
            }
        }

        tracing::debug!(path = %path.display(), "Created overflow log");
        self.temp_file = Some(file);
        self.temp_file_path = Some(path);
    }

    /// Size of the final line of the stream, excluding its newline.
    const fn last_line_bytes(&self) -> usize {
        if self.ends_with_newline {
            self.last_complete_line_bytes
        } else {
            self.current_line_bytes
        }
    }

    /// Tail truncation of the buffered output with stream-wide totals.
    pub fn snapshot(&self) -> TruncationResult {
        let mut bytes = Vec::with_capacity(self.chunks_bytes);
        for chunk in &self.chunks {
            bytes.extend_from_slice(chunk);
        }
        let text = String::from_utf8_lossy(&bytes);
        let mut truncation = truncate_tail(&text, self.limits.max_lines, self.limits.max_bytes);

        if self.total_bytes > self.chunks_bytes {
            truncation.truncated = true;
            if truncation.truncated_by.is_none() {
                truncation.truncated_by = Some(TruncatedBy::Bytes);
            }
        }
        truncation.total_bytes = self.total_bytes;
        truncation.total_lines = self.total_lines();
        if truncation.last_line_partial {
            truncation.cut_line_bytes = Some(self.last_line_bytes());
        }
        truncation
    }

    /// Flush and close the overflow file and produce the final tail.
    pub async fn finish(mut self) -> CapturedOutput {
        if let Some(mut file) = self.temp_file.take() {
            if let Err(err) = file.flush().await {
                tracing::warn!(error = %err, "Failed to flush overflow log");
            }
        }
        let full_output_path = self
            .temp_file_path
            .take()
            .filter(|path| !path.as_os_str().is_empty());
        CapturedOutput {
            truncation: self.snapshot(),
            full_output_path,
        }
    }
}

const fn is_continuation_byte(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

pub(crate) fn strip_final_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

/// Render tail-truncated output with its continuation footer.
///
/// Empty output renders as `(no output)`.
pub fn render_tail(truncation: &TruncationResult, full_output_path: Option<&Path>) -> String {
    let content = strip_final_newline(&truncation.content);
    let mut text = if content.is_empty() {
        "(no output)".to_string()
    } else {
        content.to_string()
    };
    if !truncation.truncated {
        return text;
    }

    let full_output = full_output_path
        .map(|path| format!(". Full output: {}", path.display()))
        .unwrap_or_default();
    let end_line = truncation.total_lines;
    let start_line = end_line
        .saturating_sub(truncation.output_lines)
        .saturating_add(1);

    if truncation.last_line_partial {
        let line_size = format_size(truncation.cut_line_bytes.unwrap_or(truncation.output_bytes));
        let _ = write!(
            text,
            "\n\n[Showing last {} of line {end_line} (line is {line_size}){full_output}]",
            format_size(truncation.output_bytes)
        );
    } else if truncation.truncated_by == Some(TruncatedBy::Lines) {
        let _ = write!(
            text,
            "\n\n[Showing lines {start_line}-{end_line} of {}{full_output}]",
            truncation.total_lines
        );
    } else {
        let _ = write!(
            text,
            "\n\n[Showing lines {start_line}-{end_line} of {} ({} limit){full_output}]",
            truncation.total_lines,
            format_size(truncation.max_bytes)
        );
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_limits() -> TruncationLimits {
        TruncationLimits {
            max_lines: 5,
            max_bytes: 64,
        }
    }

    #[tokio::test]
    async fn small_output_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(small_limits(), dir.path());
        sink.push(b"a\nb\n").await;
        let captured = sink.finish().await;
        assert!(!captured.truncation.truncated);
        assert_eq!(captured.truncation.content, "a\nb\n");
        assert_eq!(captured.truncation.total_lines, 2);
        assert!(captured.full_output_path.is_none());
        assert_eq!(render_tail(&captured.truncation, None), "a\nb");
    }

    #[tokio::test]
    async fn overflow_file_holds_complete_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(small_limits(), dir.path());
        let mut expected = Vec::new();
        for i in 0..100 {
            let line = format!("line {i}\n");
            expected.extend_from_slice(line.as_bytes());
            sink.push(line.as_bytes()).await;
        }
        let captured = sink.finish().await;

        let path = captured.full_output_path.expect("overflow file");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("pi-bash-") && name.ends_with(".log"));
        assert_eq!(name.len(), "pi-bash-".len() + 16 + ".log".len());
        assert_eq!(std::fs::read(&path).unwrap(), expected);

        let truncation = &captured.truncation;
        assert!(truncation.truncated);
        assert_eq!(truncation.total_lines, 100);
        assert_eq!(truncation.total_bytes, expected.len());
        assert!(truncation.content.ends_with("line 99"));
    }

    #[tokio::test]
    async fn eviction_keeps_full_budget_on_char_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(small_limits(), dir.path());
        sink.push("é".repeat(40).as_bytes()).await;
        sink.push(format!("{}z", "é".repeat(30)).as_bytes()).await;

        // 141 bytes against a 128 byte budget: 13 come off the front, plus
        // one more so the buffer starts on a whole character.
        assert_eq!(sink.chunks_bytes, 127);
        let buffered: Vec<u8> = sink.chunks.iter().flatten().copied().collect();
        assert_eq!(buffered.len(), 127);
        assert!(String::from_utf8(buffered).is_ok());

        let truncation = sink.snapshot();
        assert!(truncation.truncated);
        assert!(!truncation.content.contains('\u{FFFD}'), "{}", truncation.content);
        assert!(truncation.content.ends_with("éz"));
        assert_eq!(truncation.total_bytes, 141);
    }

    #[tokio::test]
    async fn single_oversized_chunk_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(small_limits(), dir.path());
        sink.push(&[b'x'; 300]).await;
        assert_eq!(sink.chunks_bytes, 128);
        assert_eq!(sink.chunks.len(), 1);
    }

    #[tokio::test]
    async fn line_counts_span_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(TruncationLimits::default(), dir.path());
        sink.push(b"ab").await;
        sink.push(b"c\nde").await;
        assert_eq!(sink.total_lines(), 2);
        assert_eq!(sink.last_line_bytes(), 2);
        sink.push(b"\n").await;
        assert_eq!(sink.total_lines(), 2);
        assert_eq!(sink.last_line_bytes(), 2);
    }

    #[test]
    fn footer_for_line_limit() {
        let truncation = truncate_tail("1\n2\n3\n4\n5\n6\n7\n8\n9\n10", 3, 1024);
        let rendered = render_tail(&truncation, Some(Path::new("/tmp/pi-bash-x.log")));
        assert_eq!(
            rendered,
            "8\n9\n10\n\n[Showing lines 8-10 of 10. Full output: /tmp/pi-bash-x.log]"
        );
    }

    #[test]
    fn footer_without_file_omits_path() {
        let truncation = truncate_tail("aaaa\nbbbb\ncccc", 100, 9);
        let rendered = render_tail(&truncation, None);
        assert_eq!(rendered, "bbbb\ncccc\n\n[Showing lines 2-3 of 3 (9B limit)]");
    }

    #[test]
    fn footer_for_partial_line() {
        let truncation = truncate_tail(&"x".repeat(2048), 100, 1024);
        let rendered = render_tail(&truncation, None);
        assert!(rendered.ends_with("\n\n[Showing last 1.0KB of line 1 (line is 2.0KB)]"));
    }

    #[test]
    fn empty_output_placeholder() {
        let truncation = truncate_tail("", 10, 10);
        assert_eq!(render_tail(&truncation, None), "(no output)");
    }
}
