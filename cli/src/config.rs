// Configuration management for the simmel CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/simmel/config.json
// - Linux: ~/.config/simmel/config.json
// - Windows: %APPDATA%\simmel\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simmel_core::ProtocolConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Protocol settings handed to the scheduler
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Directory for rolling log files; none logs to stderr only
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Keys accepted by `config get` / `config set`
pub const KEYS: &[&str] = &[
    "service_uuid",
    "adapter_name",
    "watchdog_timeout_secs",
    "advertising_timeout_secs",
    "advertising_interval_ms",
    "scan_timeout_secs",
    "scan_interval_ms",
    "scan_window_ms",
    "min_rssi",
    "active_scan",
    "connect_timeout_secs",
    "connection_timeout_secs",
    "tick_ms",
    "token_len",
    "token_rotation_secs",
    "dedup_scope",
    "exchange_mode",
    "log_dir",
];

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("simmel");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, creating a default file if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .protocol
                .validate()
                .context("Invalid protocol configuration")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value; the result must validate before it is kept
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        let p = &mut next.protocol;
        match key {
            "service_uuid" => p.service_uuid = value.to_string(),
            "adapter_name" => p.adapter_name = optional(value),
            "watchdog_timeout_secs" => {
                p.watchdog_timeout_secs = value.parse().context("Invalid number")?
            }
            "advertising_timeout_secs" => {
                p.advertising_timeout_secs = value.parse().context("Invalid number")?
            }
            "advertising_interval_ms" => {
                p.advertising_interval_ms = value.parse().context("Invalid number")?
            }
            "scan_timeout_secs" => p.scan_timeout_secs = value.parse().context("Invalid number")?,
            "scan_interval_ms" => p.scan_interval_ms = value.parse().context("Invalid number")?,
            "scan_window_ms" => p.scan_window_ms = value.parse().context("Invalid number")?,
            "min_rssi" => p.min_rssi = value.parse().context("Invalid RSSI")?,
            "active_scan" => p.active_scan = value.parse().context("Invalid boolean value")?,
            "connect_timeout_secs" => {
                p.connect_timeout_secs = value.parse().context("Invalid number")?
            }
            "connection_timeout_secs" => {
                p.connection_timeout_secs = value.parse().context("Invalid number")?
            }
            "tick_ms" => p.tick_ms = value.parse().context("Invalid number")?,
            "token_len" => p.token_len = value.parse().context("Invalid number")?,
            "token_rotation_secs" => {
                p.token_rotation_secs = match optional(value) {
                    Some(v) => Some(v.parse().context("Invalid number")?),
                    None => None,
                }
            }
            "dedup_scope" => p.dedup_scope = value.parse().map_err(anyhow::Error::msg)?,
            "exchange_mode" => p.exchange_mode = value.parse().map_err(anyhow::Error::msg)?,
            "log_dir" => next.log_dir = optional(value),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.protocol
            .validate()
            .with_context(|| format!("Rejected {} = {}", key, value))?;
        *self = next;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        let p = &self.protocol;
        let value = match key {
            "service_uuid" => p.service_uuid.clone(),
            "adapter_name" => p.adapter_name.clone().unwrap_or_default(),
            "watchdog_timeout_secs" => p.watchdog_timeout_secs.to_string(),
            "advertising_timeout_secs" => p.advertising_timeout_secs.to_string(),
            "advertising_interval_ms" => p.advertising_interval_ms.to_string(),
            "scan_timeout_secs" => p.scan_timeout_secs.to_string(),
            "scan_interval_ms" => p.scan_interval_ms.to_string(),
            "scan_window_ms" => p.scan_window_ms.to_string(),
            "min_rssi" => p.min_rssi.to_string(),
            "active_scan" => p.active_scan.to_string(),
            "connect_timeout_secs" => p.connect_timeout_secs.to_string(),
            "connection_timeout_secs" => p.connection_timeout_secs.to_string(),
            "tick_ms" => p.tick_ms.to_string(),
            "token_len" => p.token_len.to_string(),
            "token_rotation_secs" => p
                .token_rotation_secs
                .map(|s| s.to_string())
                .unwrap_or_default(),
            "dedup_scope" => p.dedup_scope.to_string(),
            "exchange_mode" => p.exchange_mode.to_string(),
            "log_dir" => self.log_dir.clone().unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key).unwrap_or_default();
                let shown = if value.is_empty() {
                    "(none)".to_string()
                } else {
                    value
                };
                (key.to_string(), shown)
            })
            .collect()
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
