use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::assets::DEFAULT_CONTENT_ROOT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not found", .0.display())]
    Missing(PathBuf),
    #[error("failed to read config file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Login flow for a gated authoring environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Origin that site-relative input lines are joined against.
    pub base_url: String,
    pub login_path: String,
    /// Control that reveals the login form.
    pub login_trigger_selector: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,
}

impl AuthConfig {
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)?.join(&self.login_path)
    }

    /// Join an input line (site-relative path or absolute URL) onto the
    /// author origin.
    pub fn target_url(&self, line: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)?.join(line)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.network_idle_timeout_ms)
    }
}

/// Run configuration, loaded once and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Extensions routed to the unsupported bucket.
    #[serde(default)]
    pub unsupported_extensions: Vec<String>,
    #[serde(default = "default_content_root")]
    pub content_root: String,
    #[serde(default = "default_cookie_selector")]
    pub cookie_selector: String,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_cookie_wait_ms")]
    pub cookie_wait_ms: u64,
    #[serde(default = "default_cookie_settle_ms")]
    pub cookie_settle_ms: u64,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

fn default_content_root() -> String {
    DEFAULT_CONTENT_ROOT.to_string()
}

fn default_cookie_selector() -> String {
    ".button_test".to_string()
}

fn default_navigation_timeout_ms() -> u64 {
    60_000
}

fn default_cookie_wait_ms() -> u64 {
    5_000
}

fn default_cookie_settle_ms() -> u64 {
    1_000
}

fn default_network_idle_timeout_ms() -> u64 {
    30_000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            unsupported_extensions: Vec::new(),
            content_root: default_content_root(),
            cookie_selector: default_cookie_selector(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            cookie_wait_ms: default_cookie_wait_ms(),
            cookie_settle_ms: default_cookie_settle_ms(),
            auth: None,
        }
    }
}

impl ScanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let cfg: ScanConfig = toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_root.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "content_root",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(auth) = &self.auth {
            let base = Url::parse(&auth.base_url).map_err(|e| ConfigError::Invalid {
                key: "auth.base_url",
                reason: e.to_string(),
            })?;
            if !matches!(base.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    key: "auth.base_url",
                    reason: format!("unsupported scheme `{}`", base.scheme()),
                });
            }
            auth.login_url().map_err(|e| ConfigError::Invalid {
                key: "auth.login_path",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Blocklist normalized to lowercase with any leading dot removed.
    pub fn unsupported_set(&self) -> HashSet<String> {
        self.unsupported_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn cookie_wait(&self) -> Duration {
        Duration::from_millis(self.cookie_wait_ms)
    }

    pub fn cookie_settle(&self) -> Duration {
        Duration::from_millis(self.cookie_settle_ms)
    }
}
