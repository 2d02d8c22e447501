//! Directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (the per-peer blob partitions).
///
/// Uses `RINGFS_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/ringfs` or
/// `~/.local/share/ringfs`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RINGFS_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("ringfs")
}

/// Base directory for configuration files.
///
/// Uses `RINGFS_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/ringfs` or
/// `~/.config/ringfs`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RINGFS_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("ringfs")
}
