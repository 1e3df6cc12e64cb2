use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::SearchMode;

/// Upper bound for any configured timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Environment variable that overrides `backend.base_url`.
pub const BASE_URL_ENV: &str = "RAG_BACKEND_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_path: default_upload_path(),
            search_path: default_search_path(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_upload_path() -> String {
    "/upload".to_string()
}
fn default_search_path() -> String {
    "/search".to_string()
}

impl BackendConfig {
    pub fn upload_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.upload_path)
    }

    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.search_path)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_upload_secs")]
    pub upload_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upload_secs: default_upload_secs(),
            search_secs: default_search_secs(),
        }
    }
}

fn default_upload_secs() -> u64 {
    30
}
fn default_search_secs() -> u64 {
    60
}

impl TimeoutConfig {
    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Lowercase extensions accepted for upload. Empty accepts everything.
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            accepted_extensions: default_accepted_extensions(),
        }
    }
}

fn default_accepted_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "html".to_string()]
}

impl UploadConfig {
    pub fn accepts(&self, extension: Option<&str>) -> bool {
        if self.accepted_extensions.is_empty() {
            return true;
        }
        match extension {
            Some(ext) => self
                .accepted_extensions
                .iter()
                .any(|a| a.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub default_mode: SearchMode,
    /// Keep partially streamed text when a search fails mid-stream.
    #[serde(default)]
    pub preserve_partial: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    finalize(config, std::env::var(BASE_URL_ENV).ok())
}

/// Apply the base-URL override and validate.
pub fn finalize(mut config: Config, base_url_override: Option<String>) -> Result<Config> {
    if let Some(url) = base_url_override.filter(|u| !u.trim().is_empty()) {
        config.backend.base_url = url.trim().to_string();
    }

    // Validate backend
    let parsed = url::Url::parse(&config.backend.base_url)
        .with_context(|| format!("backend.base_url is not a valid URL: {}", config.backend.base_url))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("backend.base_url must use http or https, got '{}'", other),
    }
    for (name, path) in [
        ("backend.upload_path", &config.backend.upload_path),
        ("backend.search_path", &config.backend.search_path),
    ] {
        if !path.starts_with('/') {
            anyhow::bail!("{} must start with '/'", name);
        }
    }

    // Validate timeouts
    if config.timeouts.upload_secs == 0 {
        anyhow::bail!("timeouts.upload_secs must be > 0");
    }
    if config.timeouts.search_secs == 0 {
        anyhow::bail!("timeouts.search_secs must be > 0");
    }
    for (name, secs) in [
        ("timeouts.upload_secs", config.timeouts.upload_secs),
        ("timeouts.search_secs", config.timeouts.search_secs),
    ] {
        if secs > MAX_TIMEOUT_SECS {
            anyhow::bail!("{} must be <= {}", name, MAX_TIMEOUT_SECS);
        }
    }

    for ext in config.upload.accepted_extensions.iter_mut() {
        *ext = ext.trim_start_matches('.').to_ascii_lowercase();
    }

    Ok(config)
}
