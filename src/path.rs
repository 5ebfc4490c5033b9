//! Path resolution for tool arguments.
//!
//! Model-supplied paths are relative to the tool's working directory, may use
//! `~`, and often carry the wrong flavour of space or apostrophe when they
//! name macOS screenshots.

use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

pub(crate) fn is_special_unicode_space(c: char) -> bool {
    matches!(c, '\u{00A0}' | '\u{202F}' | '\u{205F}' | '\u{3000}')
        || ('\u{2000}'..='\u{200A}').contains(&c)
}

fn normalize_unicode_spaces(s: &str) -> String {
    s.chars()
        .map(|c| if is_special_unicode_space(c) { ' ' } else { c })
        .collect()
}

fn expand_home(file_path: &str) -> PathBuf {
    let normalized = normalize_unicode_spaces(file_path);
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if normalized == "~" {
        return home();
    }
    if let Some(rest) = normalized.strip_prefix("~/") {
        return home().join(rest);
    }
    PathBuf::from(normalized)
}

/// Resolve a path relative to `cwd`. Handles `~` expansion and absolute paths.
pub fn resolve_to_cwd(file_path: &str, cwd: &Path) -> PathBuf {
    let expanded = expand_home(file_path);
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

/// Spelling variants macOS uses in screenshot file names.
fn screenshot_variants(path: &str) -> Vec<String> {
    let am_pm = path
        .replace(" AM.", "\u{202F}AM.")
        .replace(" PM.", "\u{202F}PM.");
    let nfd: String = path.nfd().collect();
    let curly = path.replace('\'', "\u{2019}");
    let nfd_curly = nfd.replace('\'', "\u{2019}");
    vec![am_pm, nfd, curly, nfd_curly]
}

/// Resolve a path for reading, trying screenshot name variants when the
/// literal path does not exist.
pub fn resolve_read_path(file_path: &str, cwd: &Path) -> PathBuf {
    let resolved = resolve_to_cwd(file_path, cwd);
    if resolved.exists() {
        return resolved;
    }
    let Some(resolved_str) = resolved.to_str() else {
        return resolved;
    };

    screenshot_variants(resolved_str)
        .into_iter()
        .filter(|variant| variant != resolved_str)
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
        .unwrap_or(resolved)
}
