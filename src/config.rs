//! Config loading and persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("config error: {reason}")]
pub struct ConfigError {
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local interface the peer listener binds to.
    pub bind_host: String,
    /// Root directory for blob partitions; defaults to the XDG data dir.
    pub data_dir: Option<PathBuf>,
    /// Read/write timeout on every peer socket, in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            data_dir: None,
            io_timeout_ms: 5_000,
        }
    }
}

impl Config {
    pub fn data_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::paths::data_dir)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }
}

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

pub fn load() -> Result<Config, ConfigError> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
}

pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load() {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| config_error(format!("failed to create {}: {e}", dir.display())))?;
    }
    let contents = toml::to_string_pretty(cfg)
        .map_err(|e| config_error(format!("failed to render config: {e}")))?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path
        .parent()
        .ok_or_else(|| config_error("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        config_error(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)
        .map_err(|e| config_error(format!("failed to write config temp file: {e}")))?;
    temp.persist(path).map_err(|e| {
        config_error(format!(
            "failed to persist config to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

fn config_error(reason: String) -> ConfigError {
    ConfigError { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            bind_host: "0.0.0.0".to_string(),
            data_dir: Some(PathBuf::from("/var/lib/ringfs")),
            io_timeout_ms: 250,
        };
        write_config(&path, &cfg).expect("write config");
        let contents = fs::read_to_string(&path).expect("read config");
        let loaded = toml::from_str::<Config>(&contents).expect("parse config");
        assert_eq!(loaded.bind_host, "0.0.0.0");
        assert_eq!(loaded.data_dir, Some(PathBuf::from("/var/lib/ringfs")));
        assert_eq!(loaded.io_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn defaults_bind_loopback_with_bounded_timeout() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_host, "127.0.0.1");
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.io_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn empty_file_parses_to_defaults() {
        let loaded = toml::from_str::<Config>("").expect("parse empty config");
        assert_eq!(loaded.bind_host, Config::default().bind_host);
        assert_eq!(loaded.io_timeout_ms, Config::default().io_timeout_ms);
    }
}
