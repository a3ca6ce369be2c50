//! Protocol configuration
//!
//! Everything the scheduler and its phases need to know about timing, radio
//! parameters and policy, injected rather than compiled in. The CLI persists
//! this structure as JSON.

use crate::platform::DEFAULT_WATCHDOG_TIMEOUT;
use crate::store::DedupScope;
use crate::transport::ble::gatt::{ServiceUuid, DEFAULT_SERVICE_UUID, MAX_CHARACTERISTIC_SIZE};
use crate::transport::ble::payload::MAX_ADV_LEN;
use crate::transport::ble::scanner::ScanConfig;
use crate::transport::ble::server::ServerConfig;
use crate::transport::ble::session::ExchangeMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur during configuration validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid service UUID: {0}")]
    InvalidServiceUuid(String),

    #[error("Adapter name too long: {0} bytes (max 29)")]
    NameTooLong(usize),

    #[error("Invalid token length: must be 1-512, got {0}")]
    InvalidTokenLength(usize),

    #[error("Invalid scan configuration: {0}")]
    InvalidScan(String),

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),
}

// ============================================================================
// PROTOCOL CONFIG
// ============================================================================

/// Longest name that fits a scan response
pub const MAX_NAME_LEN: usize = MAX_ADV_LEN - 2;

/// Complete protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// 128-bit service UUID, 32 hex digits in over-the-air byte order
    pub service_uuid: String,

    /// Name in the scan response; `None` advertises anonymously
    pub adapter_name: Option<String>,

    /// Watchdog period (seconds)
    pub watchdog_timeout_secs: u64,

    /// Advertising timeout per server phase (seconds)
    pub advertising_timeout_secs: u64,

    /// Advertising interval (milliseconds)
    pub advertising_interval_ms: u64,

    /// Scan duration per client phase (seconds)
    pub scan_timeout_secs: u64,
    pub scan_interval_ms: u64,
    pub scan_window_ms: u64,

    /// Weakest RSSI still contacted (dBm)
    pub min_rssi: i16,

    /// Request scan responses while scanning
    pub active_scan: bool,

    /// Client connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Server connection lifetime, measured from entry into serving (seconds)
    pub connection_timeout_secs: u64,

    /// Wait-loop tick (milliseconds)
    pub tick_ms: u64,

    /// Token length in bytes
    pub token_len: usize,

    /// Rotate the local token this often; `None` keeps one token forever
    pub token_rotation_secs: Option<u64>,

    /// How long a seen rand_hash suppresses further connections
    pub dedup_scope: DedupScope,

    /// Whether the client writes its own token back to peers
    pub exchange_mode: ExchangeMode,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            adapter_name: Some("Simmel".to_string()),
            watchdog_timeout_secs: DEFAULT_WATCHDOG_TIMEOUT.as_secs(),
            advertising_timeout_secs: 10,
            advertising_interval_ms: 100,
            scan_timeout_secs: 3,
            scan_interval_ms: 100,
            scan_window_ms: 100,
            min_rssi: -80,
            active_scan: true,
            connect_timeout_secs: 5,
            connection_timeout_secs: 5,
            tick_ms: 1_000,
            token_len: crate::token::DEFAULT_TOKEN_LEN,
            token_rotation_secs: None,
            dedup_scope: DedupScope::default(),
            exchange_mode: ExchangeMode::default(),
        }
    }
}

impl ProtocolConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service_uuid()?;

        if let Some(name) = &self.adapter_name {
            if name.len() > MAX_NAME_LEN {
                return Err(ConfigError::NameTooLong(name.len()));
            }
        }

        if self.token_len == 0 || self.token_len > MAX_CHARACTERISTIC_SIZE {
            return Err(ConfigError::InvalidTokenLength(self.token_len));
        }

        if self.scan_timeout_secs.checked_mul(1_000).is_none() {
            return Err(ConfigError::InvalidTiming(format!(
                "scan timeout {}s out of range",
                self.scan_timeout_secs
            )));
        }
        self.scan_config()
            .validate()
            .map_err(|e| ConfigError::InvalidScan(e.to_string()))?;

        if self.tick_ms == 0 {
            return Err(ConfigError::InvalidTiming("tick must be > 0".to_string()));
        }
        if self.advertising_timeout_secs == 0 || self.connection_timeout_secs == 0 {
            return Err(ConfigError::InvalidTiming(
                "advertising and connection timeouts must be > 0".to_string(),
            ));
        }
        if self.token_rotation_secs == Some(0) {
            return Err(ConfigError::InvalidTiming(
                "token rotation must be > 0 when set".to_string(),
            ));
        }

        // The longest stretch without a feed is a connect attempt plus one tick.
        let longest_gap = self
            .connect_timeout()
            .saturating_add(self.tick())
            .saturating_add(self.scan_interval());
        if self.watchdog_timeout() <= longest_gap {
            return Err(ConfigError::InvalidTiming(format!(
                "watchdog period {:?} must exceed {:?}",
                self.watchdog_timeout(),
                longest_gap
            )));
        }

        if self.scan_timeout_secs >= self.watchdog_timeout_secs {
            return Err(ConfigError::InvalidTiming(format!(
                "scan timeout {}s must be shorter than the watchdog period {}s",
                self.scan_timeout_secs, self.watchdog_timeout_secs
            )));
        }

        Ok(())
    }

    /// Parsed service UUID
    pub fn service_uuid(&self) -> Result<ServiceUuid, ConfigError> {
        ServiceUuid::parse(&self.service_uuid)
            .map_err(|e| ConfigError::InvalidServiceUuid(e.to_string()))
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn token_rotation(&self) -> Option<Duration> {
        self.token_rotation_secs.map(Duration::from_secs)
    }

    /// Scanner settings for one client phase
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            duration_ms: self.scan_timeout_secs.saturating_mul(1_000),
            interval_ms: self.scan_interval_ms,
            window_ms: self.scan_window_ms,
            min_rssi: self.min_rssi,
            active: self.active_scan,
        }
    }

    /// Server settings for one server phase
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            advertising_timeout: Duration::from_secs(self.advertising_timeout_secs),
            advertising_interval: Duration::from_millis(self.advertising_interval_ms),
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            tick: self.tick(),
            adapter_name: self.adapter_name.clone(),
            tx_power_dbm: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(300));
        assert_eq!(config.token_len, 160);
        assert_eq!(config.dedup_scope, DedupScope::Rolling);
        assert_eq!(config.exchange_mode, ExchangeMode::ReadOnly);
        assert_eq!(
            config.service_uuid().unwrap().to_string(),
            "f918c24c09fef0806a4f9515fcb32ab8"
        );
    }

    #[test]
    fn test_derived_phase_configs() {
        let config = ProtocolConfig::default();
        let scan = config.scan_config();
        assert_eq!(scan.duration(), Duration::from_secs(3));
        assert_eq!(scan.min_rssi, -80);

        let server = config.server_config();
        assert_eq!(server.advertising_timeout, Duration::from_secs(10));
        assert_eq!(server.connection_timeout, Duration::from_secs(5));
        assert_eq!(server.tick, Duration::from_secs(1));
        assert_eq!(server.adapter_name.as_deref(), Some("Simmel"));
    }

    #[test]
    fn test_invalid_uuid() {
        let config = ProtocolConfig {
            service_uuid: "not-a-uuid".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceUuid(_))
        ));
    }

    #[test]
    fn test_name_too_long() {
        let config = ProtocolConfig {
            adapter_name: Some("x".repeat(30)),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NameTooLong(30)));

        let config = ProtocolConfig {
            adapter_name: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_length_bounds() {
        for len in [0, 513] {
            let config = ProtocolConfig {
                token_len: len,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::InvalidTokenLength(len)));
        }
    }

    #[test]
    fn test_watchdog_must_outlast_connect() {
        let config = ProtocolConfig {
            watchdog_timeout_secs: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));
    }

    #[test]
    fn test_scan_must_be_shorter_than_watchdog() {
        let config = ProtocolConfig {
            scan_timeout_secs: 400,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));

        let config = ProtocolConfig {
            scan_timeout_secs: 290,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_timings_rejected_without_overflow() {
        let config = ProtocolConfig {
            scan_timeout_secs: u64::MAX,
            watchdog_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));
        assert_eq!(config.scan_config().duration_ms, u64::MAX);

        let config = ProtocolConfig {
            connect_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));
    }

    #[test]
    fn test_zero_rotation_rejected() {
        let config = ProtocolConfig {
            token_rotation_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"scan_timeout_secs": 6, "dedup_scope": "Process"}"#).unwrap();
        assert_eq!(config.scan_timeout_secs, 6);
        assert_eq!(config.dedup_scope, DedupScope::Process);
        assert_eq!(config.connect_timeout_secs, 5);
    }
}
