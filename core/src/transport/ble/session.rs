/// Peer session client
///
/// Opens a short-lived link to a discovered peer, finds the token service,
/// reads the characteristic and hangs up. Every transport failure comes back
/// as a [`SessionError`]; nothing here panics or propagates past one peer.

use crate::token::Token;
use crate::transport::adapter::{AdapterError, BleAdapter, BleConnection, PeerAddress};
use crate::transport::ble::gatt::ServiceUuid;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Whether the client also hands its own token to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeMode {
    /// Read the peer's token only
    ReadOnly,
    /// Read the peer's token, then write ours to the same characteristic
    Bidirectional,
}

impl Default for ExchangeMode {
    fn default() -> Self {
        Self::ReadOnly
    }
}

impl std::fmt::Display for ExchangeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl std::str::FromStr for ExchangeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read-only" | "readonly" => Ok(Self::ReadOnly),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(format!("unknown exchange mode: {}", other)),
        }
    }
}

/// Why a peer session failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    ConnectFailed(AdapterError),
    #[error("Link reported not connected")]
    NotConnected,
    #[error("Service discovery failed: {0}")]
    DiscoveryFailed(AdapterError),
    #[error("Token service not found")]
    ServiceNotFound,
    #[error("Token service has no characteristics")]
    NoCharacteristic,
    #[error("Read failed: {0}")]
    ReadFailed(AdapterError),
    #[error("Invalid token ({0} bytes)")]
    InvalidToken(usize),
}

/// Client side of the token exchange
pub struct PeerSessionClient<'a> {
    adapter: &'a dyn BleAdapter,
    service_uuid: ServiceUuid,
}

impl<'a> PeerSessionClient<'a> {
    pub fn new(adapter: &'a dyn BleAdapter, service_uuid: ServiceUuid) -> Self {
        Self {
            adapter,
            service_uuid,
        }
    }

    /// Connect to `address`, read its token and disconnect
    pub async fn connect_and_read(
        &self,
        address: &PeerAddress,
        connect_timeout: Duration,
    ) -> Result<Token, SessionError> {
        self.run(address, connect_timeout, None).await
    }

    /// Like [`Self::connect_and_read`], then write `local` back to the peer
    ///
    /// A failed write is logged; the token read from the peer is still returned.
    pub async fn exchange(
        &self,
        address: &PeerAddress,
        connect_timeout: Duration,
        local: &Token,
    ) -> Result<Token, SessionError> {
        self.run(address, connect_timeout, Some(local)).await
    }

    async fn run(
        &self,
        address: &PeerAddress,
        connect_timeout: Duration,
        write_back: Option<&Token>,
    ) -> Result<Token, SessionError> {
        // The platform scanner cannot run alongside a connection attempt.
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan before connect failed: {}", e);
        }

        info!("Connecting to {}", address);
        let mut link = self
            .adapter
            .connect(address, connect_timeout)
            .await
            .map_err(SessionError::ConnectFailed)?;

        let result = self.read_token(link.as_mut(), write_back).await;

        if let Err(e) = link.disconnect().await {
            debug!("Disconnect from {} failed: {}", address, e);
        }
        result
    }

    async fn read_token(
        &self,
        link: &mut dyn BleConnection,
        write_back: Option<&Token>,
    ) -> Result<Token, SessionError> {
        if !link.is_connected().await {
            return Err(SessionError::NotConnected);
        }
        debug!("Link to {} open", link.address());

        let services = link
            .discover_services(&[self.service_uuid])
            .await
            .map_err(SessionError::DiscoveryFailed)?;
        let service = services
            .into_iter()
            .find(|s| s.uuid == self.service_uuid)
            .ok_or(SessionError::ServiceNotFound)?;
        let characteristic = service
            .characteristics
            .into_iter()
            .next()
            .ok_or(SessionError::NoCharacteristic)?;
        debug!(
            "Characteristic {} properties 0x{:02x}",
            characteristic.uuid,
            characteristic.properties.bits()
        );

        let value = link
            .read(&characteristic)
            .await
            .map_err(SessionError::ReadFailed)?;

        // Write-back failures do not void the read.
        if let Some(local) = write_back {
            if let Err(e) = link.write(&characteristic, local.as_bytes()).await {
                warn!("Write-back to {} failed: {}", link.address(), e);
            }
        }

        Ok(Token::from_bytes(value))
    }
}
