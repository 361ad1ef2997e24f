//! Client configuration loading.
//!
//! Reads `<root>/config.toml`. Every field has a default, so a missing file
//! or a partial file is fine. A malformed file is logged and ignored.
//!
//! ```toml
//! server_addr = "notify.example.com:7400"
//! pong_window_ms = 5000
//!
//! [reconnect]
//! step_ms = 1000
//! max_delay_ms = 30000
//! ```

use std::env;
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NotifyError, Result};
use crate::storage::StorageConfig;

pub const SERVER_ENV: &str = "SELLER_NOTIFY_SERVER";
/// Forces debug-level logging in every binary when set to a truthy value.
pub const DEBUG_LOG_ENV: &str = "SELLER_NOTIFY_DEBUG_LOG";

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:7400";
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PONG_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_MAX_RECORDS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub step_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            step_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub server_addr: String,
    pub handshake_timeout_ms: u64,
    pub pong_window_ms: u64,
    pub max_records: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            pong_window_ms: DEFAULT_PONG_WINDOW_MS,
            max_records: DEFAULT_MAX_RECORDS,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl NotifyConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn pong_window(&self) -> Duration {
        Duration::from_millis(self.pong_window_ms)
    }
}

/// Loads configuration, falling back to defaults on any problem.
pub fn load_config(storage: &StorageConfig) -> NotifyConfig {
    let mut config = match read_config(storage) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Ignoring configuration file; using defaults");
            NotifyConfig::default()
        }
    };
    apply_env_overrides(&mut config);
    config
}

/// Strict variant: missing file is defaults, malformed file is an error.
pub fn read_config(storage: &StorageConfig) -> Result<NotifyConfig> {
    let path = storage.config_file();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(NotifyConfig::default())
        }
        Err(source) => {
            return Err(NotifyError::Storage {
                context: format!("reading {}", path.display()),
                source,
            })
        }
    };

    toml::from_str(&content).map_err(|err| NotifyError::ConfigMalformed {
        path,
        details: err.to_string(),
    })
}

fn apply_env_overrides(config: &mut NotifyConfig) {
    if let Ok(addr) = env::var(SERVER_ENV) {
        let addr = addr.trim();
        if !addr.is_empty() {
            config.server_addr = addr.to_string();
        }
    }
}

pub fn debug_logging_enabled() -> bool {
    env::var(DEBUG_LOG_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "YES")
}
