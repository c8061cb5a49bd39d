use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "texpane";
const SETTINGS_FILENAME: &str = "config.yaml";
const LOG_FILENAME: &str = "texpane.log";

/// `<config dir>/texpane/config.yaml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// `<cache dir>/texpane/artifacts`, if the platform has a cache dir
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(APP_NAME).join("artifacts"))
}

/// Compute the XDG-compliant log file path.
/// Uses `state_dir` on platforms that have it, falls back to `cache_dir`.
pub fn resolve_log_path() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine state or cache directory")?;

    let log_dir = base.join(APP_NAME);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {log_dir:?}"))?;

    Ok(log_dir.join(LOG_FILENAME))
}

/// Absolute directory containing `document`, used to resolve relative image links
pub fn document_dir(document: &Path) -> Result<PathBuf> {
    let abs_path = if document.is_absolute() {
        document.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(document)
    };

    Ok(abs_path
        .parent()
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf))
}
