//! Radio adapter abstraction
//!
//! The protocol core never talks to a BLE stack directly. It drives a
//! [`BleAdapter`] (advertise, scan, connect, serve) and the links it opens
//! ([`BleConnection`]). Hardware adapters implement these traits on top of
//! the platform stack; [`crate::transport::sim`] implements them over an
//! in-memory radio for tests and simulations.

use crate::transport::ble::gatt::{GattServiceDef, RemoteCharacteristic, RemoteService, ServiceUuid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors reported by an adapter or one of its links
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Operation not supported by this adapter: {0}")]
    Unsupported(String),
    #[error("Adapter is not enabled")]
    NotEnabled,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("GATT error: {0}")]
    Gatt(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Opaque peer address as reported by the stack
///
/// Usually a colon-separated BD_ADDR, but some stacks (CoreBluetooth) only
/// hand out per-host identifiers, so no structure is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Format a 6-byte BD_ADDR as `aa:bb:cc:dd:ee:ff`
    pub fn from_bd_addr(addr: [u8; 6]) -> Self {
        let parts: Vec<String> = addr.iter().map(|b| format!("{:02x}", b)).collect();
        Self(parts.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One received advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub address: PeerAddress,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Raw AD records
    pub advertisement: Vec<u8>,
}

/// Advertising session parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub data: Vec<u8>,
    pub scan_response: Option<Vec<u8>>,
    pub connectable: bool,
    /// Use a random (non-identity) address
    pub anonymous: bool,
    /// The adapter stops advertising on its own after this long
    pub timeout: Duration,
    pub interval: Duration,
}

/// Scan session parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    /// Service to look for; stacks that filter in hardware may use it
    pub service_uuid: ServiceUuid,
    pub duration: Duration,
    pub interval: Duration,
    pub window: Duration,
    pub min_rssi: i16,
    pub active: bool,
}

// ============================================================================
// ADAPTER TRAITS
// ============================================================================

/// An open link to a remote peer (client role)
#[async_trait]
pub trait BleConnection: Send + Sync {
    /// Address of the remote peer
    fn address(&self) -> &PeerAddress;

    /// Whether the link is still up
    async fn is_connected(&self) -> bool;

    /// Discover primary services, restricted to `filter` when not empty
    async fn discover_services(
        &mut self,
        filter: &[ServiceUuid],
    ) -> Result<Vec<RemoteService>, AdapterError>;

    /// Read a characteristic value
    async fn read(&mut self, characteristic: &RemoteCharacteristic)
        -> Result<Vec<u8>, AdapterError>;

    /// Write a characteristic value (with response)
    async fn write(
        &mut self,
        characteristic: &RemoteCharacteristic,
        data: &[u8],
    ) -> Result<(), AdapterError>;

    /// Tear the link down
    async fn disconnect(&mut self) -> Result<(), AdapterError>;
}

/// Local radio adapter
///
/// State queries are synchronous: implementations keep the flags they are
/// asked about behind a lock rather than round-tripping to the stack.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Address this adapter advertises from
    fn address(&self) -> PeerAddress;

    /// Whether the radio is powered and usable
    fn is_enabled(&self) -> bool {
        true
    }

    /// Set the name used in scan responses
    async fn set_name(&self, name: &str) -> Result<(), AdapterError>;

    /// Publish (or replace) the local GATT service
    async fn publish_service(&self, service: &GattServiceDef) -> Result<(), AdapterError>;

    /// Drain values peers wrote to the local characteristic
    async fn take_peer_writes(&self) -> Vec<Vec<u8>>;

    async fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), AdapterError>;

    async fn stop_advertising(&self) -> Result<(), AdapterError>;

    /// False once advertising was stopped or its timeout elapsed
    fn is_advertising(&self) -> bool;

    async fn start_scan(&self, params: &ScanParams) -> Result<(), AdapterError>;

    /// Next buffered advertisement, without waiting for one
    async fn next_scan_entry(&self) -> Result<Option<ScanEntry>, AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Connect to a peer (client role)
    async fn connect(
        &self,
        address: &PeerAddress,
        timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, AdapterError>;

    /// Number of inbound links (server role)
    fn connections(&self) -> usize;

    fn is_connected(&self) -> bool {
        self.connections() > 0
    }

    /// Drop every inbound link
    async fn disconnect_all(&self) -> Result<(), AdapterError>;
}
