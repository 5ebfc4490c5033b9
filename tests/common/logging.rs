//! Verbose test logging.
//!
//! Every entry records the elapsed time since the logger was created, a
//! level, a category (`setup`, `action`, `verify`, ...) and optional
//! key-value context. Logs are only printed when a test fails, via
//! [`super::TestHarness`].
//!
//! ```ignore
//! let logger = TestLogger::new();
//! logger.info_ctx("action", "Running tool", |ctx| {
//!     ctx.push(("tool".into(), "bash".into()));
//! });
//! // [   0.002s] INFO  [action] Running tool
//! //            tool = bash
//! ```

#![allow(dead_code)]

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};

const TEST_LOG_SCHEMA: &str = "pi_tools.test.log.v1";
const PLACEHOLDER_TEST_ROOT: &str = "<TEST_ROOT>";

/// Log entry severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
        }
    }

    pub const fn color_code(self) -> &'static str {
        match self {
            Self::Debug => "\x1b[90m",
            Self::Info => "\x1b[32m",
            Self::Warn => "\x1b[33m",
            Self::Error => "\x1b[31m",
        }
    }

    const fn as_json_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub elapsed_secs: f64,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl LogEntry {
    /// Format this entry without colors.
    pub fn format(&self) -> String {
        let mut output = format!(
            "[{:>8.3}s] {} [{}] {}\n",
            self.elapsed_secs,
            self.level.as_str(),
            self.category,
            self.message
        );
        for (key, value) in &self.context {
            let _ = writeln!(output, "           {key} = {value}");
        }
        output
    }

    pub fn format_colored(&self) -> String {
        const RESET: &str = "\x1b[0m";
        const DIM: &str = "\x1b[2m";

        let mut output = format!(
            "{DIM}[{:>8.3}s]{RESET} {}{}{RESET} {DIM}[{}]{RESET} {}\n",
            self.elapsed_secs,
            self.level.color_code(),
            self.level.as_str(),
            self.category,
            self.message
        );
        for (key, value) in &self.context {
            let _ = writeln!(output, "{DIM}           {key}{RESET} = {value}");
        }
        output
    }
}

#[derive(Debug, Serialize)]
struct TestLogJsonRecord<'a> {
    schema: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test: Option<&'a str>,
    seq: usize,
    t_ms: u64,
    level: &'static str,
    category: &'a str,
    message: String,
    context: BTreeMap<&'a str, String>,
}

/// Thread-safe logger that keeps every entry in memory.
pub struct TestLogger {
    entries: Mutex<Vec<LogEntry>>,
    start: Instant,
    min_level: LogLevel,
    test_name: Mutex<Option<String>>,
    normalize_root: Mutex<Option<String>>,
}

impl Default for TestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_min_level(LogLevel::Debug)
    }

    /// Only capture entries at or above `min_level`.
    #[must_use]
    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(128)),
            start: Instant::now(),
            min_level,
            test_name: Mutex::new(None),
            normalize_root: Mutex::new(None),
        }
    }

    pub fn set_test_name(&self, name: impl Into<String>) {
        *self.test_name.lock().unwrap() = Some(name.into());
    }

    /// Replace this path with `<TEST_ROOT>` in JSONL dumps.
    pub fn set_normalization_root(&self, root: impl AsRef<Path>) {
        *self.normalize_root.lock().unwrap() = Some(root.as_ref().display().to_string());
    }

    pub fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        self.with_context(level, category, message, |_| {});
    }

    pub fn debug(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, category, message);
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, category, message);
    }

    pub fn warn(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, category, message);
    }

    pub fn error(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, category, message);
    }

    /// Log an entry with key-value context filled in by `f`.
    pub fn with_context<F>(&self, level: LogLevel, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        if level < self.min_level {
            return;
        }
        let mut context = Vec::new();
        f(&mut context);
        let entry = LogEntry {
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            level,
            category: category.to_string(),
            message: message.into(),
            context,
        };
        self.entries.lock().unwrap().push(entry);
    }

    pub fn info_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.with_context(LogLevel::Info, category, message, f);
    }

    pub fn debug_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.with_context(LogLevel::Debug, category, message, f);
    }

    pub fn error_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.with_context(LogLevel::Error, category, message, f);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.level == LogLevel::Error)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn dump(&self) -> String {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(LogEntry::format)
            .collect()
    }

    pub fn dump_colored(&self) -> String {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(LogEntry::format_colored)
            .collect()
    }

    /// One JSON object per entry, with the normalization root masked.
    pub fn dump_jsonl(&self) -> String {
        let test_name = self.test_name.lock().unwrap().clone();
        let root = self.normalize_root.lock().unwrap().clone();
        let mask = |text: &str| match root.as_deref() {
            Some(root) if !root.is_empty() => text.replace(root, PLACEHOLDER_TEST_ROOT),
            _ => text.to_string(),
        };

        let entries = self.entries.lock().unwrap();
        let mut output = String::new();
        for (seq, entry) in entries.iter().enumerate() {
            let record = TestLogJsonRecord {
                schema: TEST_LOG_SCHEMA,
                test: test_name.as_deref(),
                seq,
                t_ms: (entry.elapsed_secs * 1000.0) as u64,
                level: entry.level.as_json_str(),
                category: &entry.category,
                message: mask(&entry.message),
                context: entry
                    .context
                    .iter()
                    .map(|(key, value)| (key.as_str(), mask(value)))
                    .collect(),
            };
            if let Ok(line) = serde_json::to_string(&record) {
                output.push_str(&line);
                output.push('\n');
            }
        }
        output
    }
}

/// Route the crate's `tracing` output to the test writer.
///
/// Filtered by `RUST_LOG`, defaulting to `pi_tools=debug`. Safe to call from
/// every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pi_tools=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
