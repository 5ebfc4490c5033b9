//! Tool settings.
//!
//! Only the `tools` slice of the agent's settings lives here. The caller owns
//! locating and merging settings files; this module parses a JSON object (or a
//! single file) into [`ToolSettings`] and supplies defaults.

use crate::error::{Error, Result};
use crate::truncate::{DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES, TruncationLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout (in seconds) for bash tool execution.
pub const DEFAULT_BASH_TIMEOUT_SECS: u64 = 120;

/// Grace period between SIGTERM and SIGKILL for a cancelled command.
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 5_000;

/// Settings for the built-in tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    // Shell
    #[serde(alias = "shellPath")]
    pub shell_path: Option<String>,
    #[serde(alias = "shellCommandPrefix")]
    pub shell_command_prefix: Option<String>,
    /// Default bash timeout; `0` disables the timeout.
    #[serde(alias = "bashTimeoutSecs")]
    pub bash_timeout_secs: Option<u64>,
    #[serde(alias = "terminateGraceMs")]
    pub terminate_grace_ms: Option<u64>,
    /// Directory for overflow logs (defaults to the platform temp dir).
    #[serde(alias = "tempDir")]
    pub temp_dir: Option<PathBuf>,

    // Output budgets
    #[serde(alias = "maxLines")]
    pub max_lines: Option<usize>,
    #[serde(alias = "maxBytes")]
    pub max_bytes: Option<usize>,

    // Patches
    #[serde(alias = "patchFuzz")]
    pub patch_fuzz: Option<usize>,
}

impl ToolSettings {
    pub fn from_json_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse tool settings: {e}")))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::config(format!("Failed to parse tool settings: {e}")))
    }

    /// Load settings from a specific path; a missing or blank file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })
    }

    /// Merge two configurations, with `other` taking precedence.
    pub fn merge(base: Self, other: Self) -> Self {
        Self {
            shell_path: other.shell_path.or(base.shell_path),
            shell_command_prefix: other.shell_command_prefix.or(base.shell_command_prefix),
            bash_timeout_secs: other.bash_timeout_secs.or(base.bash_timeout_secs),
            terminate_grace_ms: other.terminate_grace_ms.or(base.terminate_grace_ms),
            temp_dir: other.temp_dir.or(base.temp_dir),
            max_lines: other.max_lines.or(base.max_lines),
            max_bytes: other.max_bytes.or(base.max_bytes),
            patch_fuzz: other.patch_fuzz.or(base.patch_fuzz),
        }
    }

    pub fn limits(&self) -> TruncationLimits {
        TruncationLimits {
            max_lines: self.max_lines.unwrap_or(DEFAULT_MAX_LINES),
            max_bytes: self.max_bytes.unwrap_or(DEFAULT_MAX_BYTES),
        }
    }

    /// Default bash timeout, `None` when disabled.
    pub fn bash_timeout(&self) -> Option<Duration> {
        match self.bash_timeout_secs.unwrap_or(DEFAULT_BASH_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(
            self.terminate_grace_ms
                .unwrap_or(DEFAULT_TERMINATE_GRACE_MS),
        )
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn patch_fuzz(&self) -> usize {
        self.patch_fuzz.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let settings = ToolSettings::default();
        assert_eq!(settings.limits(), TruncationLimits::default());
        assert_eq!(
            settings.bash_timeout(),
            Some(Duration::from_secs(DEFAULT_BASH_TIMEOUT_SECS))
        );
        assert_eq!(settings.patch_fuzz(), 0);
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let settings = ToolSettings::from_json_str(
            r#"{"shellPath": "/bin/zsh", "maxBytes": 1024, "bashTimeoutSecs": 0, "patchFuzz": 2}"#,
        )
        .unwrap();
        assert_eq!(settings.shell_path.as_deref(), Some("/bin/zsh"));
        assert_eq!(settings.limits().max_bytes, 1024);
        assert_eq!(settings.bash_timeout(), None);
        assert_eq!(settings.patch_fuzz(), 2);
    }

    #[test]
    fn merge_prefers_other() {
        let base = ToolSettings {
            shell_path: Some("/bin/bash".into()),
            max_lines: Some(10),
            ..ToolSettings::default()
        };
        let other = ToolSettings {
            max_lines: Some(20),
            ..ToolSettings::default()
        };
        let merged = ToolSettings::merge(base, other);
        assert_eq!(merged.shell_path.as_deref(), Some("/bin/bash"));
        assert_eq!(merged.max_lines, Some(20));
    }

    #[test]
    fn invalid_json_is_config_error() {
        let err = ToolSettings::from_json_str("{not json").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ToolSettings::load_from_path(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, ToolSettings::default());
    }
}
