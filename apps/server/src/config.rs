//! Server configuration.
//!
//! Read from the TOML file named by `DRIVEUP_CONFIG` (default
//! `./driveup.toml`). A missing file means defaults. The access token may
//! also come from `DRIVEUP_ACCESS_TOKEN`, which wins over the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use driveup_upload::UploadConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "DRIVEUP_CONFIG";
const TOKEN_ENV: &str = "DRIVEUP_ACCESS_TOKEN";
const DEFAULT_CONFIG_PATH: &str = "driveup.toml";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: SocketAddr,

    /// Drive API root.
    pub api_base_url: String,

    /// Bearer credential for the drive API.
    pub access_token: String,

    /// Accepted `x-api-key` values. Empty rejects every upload.
    pub api_keys: Vec<String>,

    /// Where incoming files are spooled; the system temp dir when unset.
    pub spool_dir: Option<PathBuf>,

    pub upload: UploadConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            api_base_url: "https://graph.microsoft.com/v1.0".into(),
            access_token: String::new(),
            api_keys: Vec::new(),
            spool_dir: None,
            upload: UploadConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_from(&path)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            config.access_token = token;
        }
        Ok(config)
    }

    /// Loads configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.upload.sizer.validate()?;
        Ok(config)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
