use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const API_KEY_ENV: &str = "WATCHTRACK_APIKEY";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default)]
    pub backend: Backend,
    pub remote: Option<RemoteConfig>,
    pub local: Option<LocalConfig>,
}

/// Where the authoritative table lives.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Remote,
    Device,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "apikey")]
    pub api_key: String,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    pub path: Option<PathBuf>,
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if let Some(remote) = config.remote.as_mut() {
                remote.api_key = api_key;
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Configuration = serde_yaml::from_str(content)?;
        if config.backend == Backend::Remote && config.remote.is_none() {
            anyhow::bail!("backend is 'remote' but no remote section is configured");
        }
        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        self.local
            .as_ref()
            .and_then(|l| l.path.clone())
            .unwrap_or_else(|| PathBuf::from("watchtrack-store.json"))
    }
}

impl RemoteConfig {
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or("movies")
    }
}
