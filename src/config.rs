//! Client configuration.
//!
//! Defaults target a local backend. Overridable via
//! ~/.taskdeck/config.toml and TASKDECK_* environment variables.

use crate::logging;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8888/v1/api";
pub const DEFAULT_CHAT_BASE_URL: &str = "http://127.0.0.1:8888/chat";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum attempts for idempotent requests hitting transient errors.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds).
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Retry behavior for idempotent requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the board's REST API.
    pub base_url: String,
    /// Root of the chat surface (streams live on `{chat_base_url}/chat`).
    pub chat_base_url: String,
    /// Per-request timeout for non-streaming calls.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// On-disk shape of config.toml. Every field optional; absent fields keep
/// their defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    base_url: Option<String>,
    chat_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

/// Per-user data directory. Can be overridden with `$TASKDECK_HOME`.
pub fn taskdeck_dir() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("TASKDECK_HOME") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("no home directory"))?;
    Ok(home.join(".taskdeck"))
}

impl ClientConfig {
    /// Defaults, then config.toml, then environment overrides. A broken
    /// config file is logged and ignored rather than failing startup.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = taskdeck_dir() {
            let path = dir.join("config.toml");
            if path.exists() {
                match read_config_file(&path) {
                    Ok(file) => config.apply(file),
                    Err(err) => {
                        logging::warn(&format!("ignoring {}: {}", path.display(), err));
                    }
                }
            }
        }

        if let Ok(url) = std::env::var("TASKDECK_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(url) = std::env::var("TASKDECK_CHAT_URL") {
            config.chat_base_url = url;
        }

        config
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if let Some(url) = file.chat_base_url {
            self.chat_base_url = url;
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.retry_max_attempts {
            self.retry.max_attempts = attempts;
        }
        if let Some(delay) = file.retry_base_delay_ms {
            self.retry.base_delay_ms = delay;
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&data).context("parse config.toml")
}
