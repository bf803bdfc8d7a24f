//! Application configuration management.
//!
//! Configuration is stored at `~/.config/drivekey/config.json` and can be
//! overridden per process through `DRIVEKEY_*` environment variables. It is
//! resolved once at startup; the API client never re-reads it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::client::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::auth::{
    EncryptedFileStorage, KeyringStorage, MemoryStorage, RestorePolicy, TokenStorage,
    DEFAULT_SERVICE_NAME,
};

/// Application name used for config/data directory paths
const APP_NAME: &str = "drivekey";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted token file name (file storage backend)
const TOKEN_FILE: &str = "tokens.json";

pub const ENV_API_URL: &str = "DRIVEKEY_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "DRIVEKEY_TIMEOUT_SECS";
pub const ENV_RESTORE_POLICY: &str = "DRIVEKEY_RESTORE_POLICY";
pub const ENV_STORAGE: &str = "DRIVEKEY_STORAGE";
pub const ENV_STORAGE_PASSPHRASE: &str = "DRIVEKEY_STORAGE_PASSPHRASE";

/// Where the token pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file in the data directory
    File,
    /// Process memory only
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub restore_policy: RestorePolicy,
    pub storage: StorageBackend,
    pub keyring_service: Option<String>,
    pub token_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the config file, then apply `DRIVEKEY_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            debug!(url = %url, "API URL overridden from environment");
            self.api_url = Some(url.trim().to_string());
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds", ENV_TIMEOUT_SECS))?;
            self.timeout_secs = Some(secs);
        }
        if let Some(policy) = lookup(ENV_RESTORE_POLICY) {
            self.restore_policy = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(backend) = lookup(ENV_STORAGE) {
            self.storage = backend.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn token_file(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.token_file {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(TOKEN_FILE))
    }

    /// Open the configured token storage. The file backend needs a passphrase.
    pub fn open_storage(&self, passphrase: Option<&str>) -> Result<Arc<dyn TokenStorage>> {
        let storage: Arc<dyn TokenStorage> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStorage::new(
                self.keyring_service.as_deref().unwrap_or(DEFAULT_SERVICE_NAME),
            )),
            StorageBackend::File => {
                let passphrase = passphrase.ok_or_else(|| {
                    anyhow::anyhow!("File storage requires {}", ENV_STORAGE_PASSPHRASE)
                })?;
                let path = self.token_file()?;
                Arc::new(
                    EncryptedFileStorage::open(&path, passphrase)
                        .with_context(|| format!("Failed to open token file {}", path.display()))?,
                )
            }
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(storage)
    }
}
