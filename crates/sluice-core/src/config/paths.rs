//! Standard locations for Sluice settings

use std::path::PathBuf;

/// Directory holding Sluice settings
///
/// Returns: `~/.config/sluice`, or `./.config/sluice` without a home directory
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("sluice")
}

/// Path of a settings file inside [`config_dir`]
///
/// # Arguments
/// * `filename` - Settings file name (e.g., "loopback.yaml")
///
/// Returns: `~/.config/sluice/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
