//! Host configuration bridge: where the API key is read from and written to.
//!
//! The UI never touches the config file directly; it asks a bridge and only adopts
//! a new key once the bridge reports success.

use crate::config::{self, Config};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Read and write the stored API key (and read the full config) on behalf of the UI.
pub trait ConfigBridge: Send + Sync {
    /// Current API key, if one is stored.
    fn get_api_key(&self) -> Result<Option<String>>;

    /// Store a new API key. Returns Ok only when it was persisted.
    fn set_api_key(&self, api_key: &str) -> Result<()>;

    /// Full config as currently stored.
    fn load_config(&self) -> Result<Config>;
}

/// Bridge backed by the JSON config file.
#[derive(Debug, Clone)]
pub struct FileConfigBridge {
    path: PathBuf,
}

impl FileConfigBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Bridge for the default config path (TANDEM_CONFIG_PATH or the platform config dir).
    pub fn from_default_path() -> Self {
        Self::new(config::default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigBridge for FileConfigBridge {
    fn get_api_key(&self) -> Result<Option<String>> {
        let config = self.load_config()?;
        Ok(config::resolve_openai_api_key(&config))
    }

    fn set_api_key(&self, api_key: &str) -> Result<()> {
        let mut config = self.load_config()?;
        config.openai_api_key = Some(api_key.to_string());
        config::save_config(&config, &self.path)?;
        log::info!("openai api key saved to {}", self.path.display());
        Ok(())
    }

    fn load_config(&self) -> Result<Config> {
        let (config, _) = config::load_config(Some(self.path.clone()))?;
        Ok(config)
    }
}
