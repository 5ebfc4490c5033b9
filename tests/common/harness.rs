//! Per-test setup and teardown.
//!
//! `TestHarness` owns a temporary directory and a [`TestLogger`]. When the
//! test panics the captured log is printed to stderr before the directory is
//! removed.
//!
//! ```ignore
//! #[tokio::test]
//! async fn edits_file() {
//!     let harness = TestHarness::new("edits_file");
//!     let path = harness.create_file("a.txt", "hello\n");
//!     harness.log().info_ctx("action", "Editing", |ctx| {
//!         ctx.push(("path".into(), path.display().to_string()));
//!     });
//! }
//! ```

#![allow(dead_code)]

use super::logging::{TestLogger, init_tracing};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestHarness {
    name: String,
    temp_dir: TempDir,
    logger: TestLogger,
}

impl TestHarness {
    pub fn new(name: impl Into<String>) -> Self {
        init_tracing();
        let name = name.into();
        let temp_dir = TempDir::new().expect("create temp directory");
        let logger = TestLogger::new();
        logger.set_test_name(&name);
        logger.set_normalization_root(temp_dir.path());

        logger.info("harness", format!("Test '{name}' started"));
        logger.info_ctx("harness", "Temp directory created", |ctx| {
            ctx.push(("path".into(), temp_dir.path().display().to_string()));
        });

        Self {
            name,
            temp_dir,
            logger,
        }
    }

    pub const fn log(&self) -> &TestLogger {
        &self.logger
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn temp_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Create a file (and its parents) under the temp directory.
    pub fn create_file(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.temp_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent directories");
        }
        let content = content.as_ref();
        std::fs::write(&path, content).expect("write test file");

        self.logger.info_ctx("harness", "Created test file", |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
            ctx.push(("size".into(), format!("{} bytes", content.len())));
        });
        path
    }

    pub fn create_dir(&self, name: impl AsRef<Path>) -> PathBuf {
        let path = self.temp_path(name);
        std::fs::create_dir_all(&path).expect("create test directory");
        path
    }

    pub fn read_file(&self, name: impl AsRef<Path>) -> String {
        let path = self.temp_path(name);
        let content = std::fs::read_to_string(&path).expect("read test file");
        self.logger.debug_ctx("harness", "Read test file", |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
            ctx.push(("size".into(), format!("{} bytes", content.len())));
        });
        content
    }

    pub fn read_bytes(&self, name: impl AsRef<Path>) -> Vec<u8> {
        std::fs::read(self.temp_path(name)).expect("read test file")
    }

    pub fn file_exists(&self, name: impl AsRef<Path>) -> bool {
        self.temp_path(name).exists()
    }

    pub fn section(&self, name: &str) {
        self.logger.info("section", format!("=== {name} ==="));
    }

    pub fn dump_logs(&self) {
        eprintln!("\n=== TEST LOGS: {} ===", self.name);
        eprint!("{}", self.logger.dump_colored());
        eprintln!("=== END LOGS ===\n");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.dump_logs();
        }
    }
}
