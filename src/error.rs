//! Error types for the tool-execution engine.
//!
//! Engines return [`Result`]; the tool boundary ([`crate::edit::EditResult`],
//! [`crate::shell::ShellResult`], [`crate::tools::ToolOutput`]) converts every
//! error into a `success = false` record so the agent loop can keep going.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tool execution.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing file, missing text, or other lookup failure.
    #[error("{0}")]
    NotFound(String),

    /// Read offset past the last line.
    #[error("Offset {offset} is beyond end of file ({total_lines} lines total)")]
    OffsetBeyondEnd { offset: usize, total_lines: usize },

    /// Edit target occurs more than once.
    #[error(
        "Found {occurrences} occurrences of the text in {path}. The text must be unique. Please provide more context to make it unique."
    )]
    AmbiguousMatch { occurrences: usize, path: String },

    /// Hunk context did not match the file.
    #[error("Hunk {hunk} does not apply at line {line}: expected {expected:?}, found {actual:?}")]
    PatchConflict {
        hunk: usize,
        line: usize,
        expected: String,
        actual: String,
    },

    /// Shell working directory is gone.
    #[error(
        "Working directory does not exist: {}\nCannot execute bash commands.",
        .0.display()
    )]
    WorkingDirectoryMissing(PathBuf),

    /// Command exceeded its wall-clock budget.
    #[error("Command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    /// Command cancelled through an [`crate::shell::AbortSignal`].
    #[error("Command aborted")]
    Aborted,

    /// The shell could not be started.
    #[error("Failed to spawn shell: {0}")]
    ProcessSpawn(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a spawn failure.
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::ProcessSpawn(message.into())
    }

    /// Stable snake_case tag surfaced as `errorKind` in tool results.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::OffsetBeyondEnd { .. } => "not_found",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::PatchConflict { .. } => "patch_conflict",
            Self::WorkingDirectoryMissing(_) => "working_directory_missing",
            Self::Timeout { .. } => "timeout",
            Self::Aborted => "aborted",
            Self::ProcessSpawn(_) => "process_spawn_failure",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Whether this error required killing a process tree.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Aborted)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}
