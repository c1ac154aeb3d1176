//! Settings persistence via TOML.
//!
//! Stored at `<config_dir>/pickup/config.toml`. A missing or corrupt file
//! yields defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::code::DEFAULT_SCAN_PREFIX;
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://remoteupload.vercel.app";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// App-private directory holding the registry document and blobs.
    pub storage_root: PathBuf,
    /// Base URL of the pickup exchange service.
    pub base_url: String,
    /// Per-request timeout for exchange calls.
    pub timeout_secs: u64,
    /// How often `watch` re-reads the registry.
    pub poll_interval_secs: u64,
    /// Prefix for generated scan payloads.
    pub scan_prefix: String,
    /// Preferred preview application, tried before the system viewer.
    pub preview_app: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let storage_root = dirs::data_dir()
            .map(|d| d.join("pickup"))
            .unwrap_or_else(|| PathBuf::from("pickup-data"));

        Self {
            storage_root,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            poll_interval_secs: 5,
            scan_prefix: DEFAULT_SCAN_PREFIX.to_string(),
            preview_app: None,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pickup").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "config loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt config file, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(e, format!("creating {}", parent.display())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| Error::io(e, format!("writing {}", path.display())))?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("base_url {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}
