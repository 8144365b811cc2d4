//! Miscellaneous helper utilities.
use std::env;
use std::path::Path;

/// Environment variable that forces every call onto Level 3.
pub const FORCE_LEVEL3_ENV: &str = "FORCE_LEVEL3_OEMCRYPTO";

/// Ensure a file path's parent directory exists.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Whether the environment asks for Level 3 only.
#[must_use]
pub fn force_level3_from_env() -> bool {
    env::var(FORCE_LEVEL3_ENV).is_ok_and(|value| is_force_level3_value(&value))
}

/// Only the exact, lowercase `yes` counts.
#[must_use]
pub fn is_force_level3_value(value: &str) -> bool {
    value == "yes"
}

/// Size of a regular file, or `None` if it cannot be inspected.
#[must_use]
pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}
