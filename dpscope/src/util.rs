//! Small helpers shared across modules.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the per-user configuration directory under the home directory.
const APP_DIR: &str = ".dpscope";

/// Current time as Unix milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The user's home directory, falling back to the working directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.dpscope`
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(APP_DIR)
}

/// `~/.dpscope/sessions`
#[must_use]
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Truncate a string to at most `max_chars` characters, appending `...`
/// when anything was cut.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
