//! Pi tools - local tool-execution engine for the Pi coding agent
//!
//! The agent loop hands model tool calls to this crate and gets back bounded,
//! display-ready results:
//! - [`truncate`]: line/byte budgets with head and tail strategies
//! - [`edit`]: fuzzy-match text replacement and unified-diff application that
//!   preserve line endings and BOM
//! - [`shell`]: shell execution with timeouts, abort, process-tree cleanup and
//!   overflow logs
//! - [`tools`]: the `read`, `write`, `edit`, `patch` and `bash` tool adapters
//!
//! Errors are [`Error`]; every tool-facing entry point folds them into a
//! result record instead of returning `Err`.

#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::uninlined_format_args,
        clippy::missing_const_for_fn,
        clippy::too_many_lines
    )
)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names
)]

pub mod config;
pub mod edit;
pub mod error;
pub mod model;
pub mod path;
pub mod shell;
pub mod tools;
pub mod truncate;

pub use error::{Error, Result};
