//! Shared integration-test infrastructure for `pi_tools`.
//!
//! - Verbose logging with auto-dump on test failure
//! - A harness owning a temp directory per test

pub mod harness;
pub mod logging;

#[allow(unused_imports)]
pub use harness::TestHarness;
