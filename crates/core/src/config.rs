use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Applied to every request; a timed-out call counts as a network failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8001/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Page a tab is sent to when a destination is blocked or over quota.
    #[serde(default = "default_interstitial_url")]
    pub interstitial_url: String,
    /// URL prefixes owned by the host itself; never classified.
    #[serde(default = "default_internal_schemes")]
    pub internal_schemes: Vec<String>,
}

fn default_refresh_interval_secs() -> u64 {
    5 * 60
}

fn default_interstitial_url() -> String {
    "chrome-extension://butterfly/blocked.html".to_string()
}

fn default_internal_schemes() -> Vec<String> {
    vec!["chrome://".to_string(), "chrome-extension://".to_string()]
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            interstitial_url: default_interstitial_url(),
            internal_schemes: default_internal_schemes(),
        }
    }
}

impl EnforcementConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn is_internal_url(&self, url: &str) -> bool {
        self.internal_schemes
            .iter()
            .any(|scheme| !scheme.is_empty() && url.starts_with(scheme.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub enforcement: EnforcementConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn authority_base_url(&self) -> String {
        self.authority.base_url.trim().trim_end_matches('/').to_string()
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_secs(self.authority.timeout_secs.max(1))
    }
}
