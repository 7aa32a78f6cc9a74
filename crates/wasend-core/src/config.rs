//! Wasend configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WasendError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasendConfig {
    /// Data directory holding the SQLite database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_data_dir() -> String {
    "~/.wasend".into()
}

impl Default for WasendConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: HostConfig::default(),
            session: SessionConfig::default(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Messenger automation host (the embedded WhatsApp client service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Base URL of the automation host API.
    #[serde(default = "default_host_url")]
    pub base_url: String,
    /// Bearer token for the automation host, if it requires one.
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_host_timeout")]
    pub timeout_secs: u64,
}

fn default_host_url() -> String {
    "http://127.0.0.1:4730".into()
}
fn default_host_timeout() -> u64 {
    30
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_url: default_host_url(),
            api_key: String::new(),
            timeout_secs: default_host_timeout(),
        }
    }
}

/// Session pool limits and restart behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cap on concurrently live (non-closed) sessions in this process.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Re-create sessions for tenants with persisted auth material on boot.
    #[serde(default = "default_true")]
    pub replay_on_boot: bool,
}

fn default_max_sessions() -> usize {
    25
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_sessions: default_max_sessions(), replay_on_boot: default_true() }
    }
}

/// Dispatch worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound between dispatch ticks in seconds. The worker sleeps to
    /// the nearest pending deadline when that is sooner.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Retry budget per send before the step is recorded FAILED.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Base for the exponential retry backoff, in seconds.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
}

fn default_tick_secs() -> u64 {
    15
}
fn default_max_send_attempts() -> u32 {
    3
}
fn default_retry_base_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_send_attempts: default_max_send_attempts(),
            retry_base_secs: default_retry_base_secs(),
        }
    }
}

/// HTTP gateway binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}
fn default_gateway_port() -> u16 {
    4720
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { host: default_gateway_host(), port: default_gateway_port() }
    }
}

impl WasendConfig {
    /// Load from the default path, falling back to defaults when absent.
    /// `WASEND_CONFIG` overrides the path.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("WASEND_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        let path = Self::default_path();
        if path.exists() { Self::load_from(&path) } else { Ok(Self::default()) }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WasendError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| WasendError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WasendError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    pub fn home_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".wasend")
    }

    /// Path of the SQLite database inside `data_dir`.
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("wasend.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = WasendConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: WasendConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.session.max_sessions, 25);
        assert_eq!(parsed.scheduler.max_send_attempts, 3);
        assert_eq!(parsed.gateway.port, 4720);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let parsed: WasendConfig =
            toml::from_str("[scheduler]\ntick_secs = 5\n").unwrap();
        assert_eq!(parsed.scheduler.tick_secs, 5);
        assert_eq!(parsed.scheduler.retry_base_secs, 30);
        assert_eq!(parsed.host.base_url, "http://127.0.0.1:4730");
    }
}
