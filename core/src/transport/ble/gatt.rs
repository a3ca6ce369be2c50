/// GATT service definition for the token exchange
///
/// One primary service keyed by the configured 128-bit UUID, holding exactly
/// one characteristic with the same UUID. The characteristic value is the
/// local token: fixed length, open read and open write.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Default service UUID, in advertisement byte order
pub const DEFAULT_SERVICE_UUID: &str = "f918c24c09fef0806a4f9515fcb32ab8";

/// Maximum GATT characteristic value size (protocol limitation)
pub const MAX_CHARACTERISTIC_SIZE: usize = 512;

/// Errors for GATT definitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Invalid service UUID: {0}")]
    InvalidUuid(String),
    #[error("Characteristic value of {0} bytes exceeds {MAX_CHARACTERISTIC_SIZE}")]
    ValueTooLarge(usize),
    #[error("Characteristic value must not be empty")]
    EmptyValue,
}

/// 128-bit service UUID kept in over-the-air byte order
///
/// Advertisements carry UUIDs little-endian, so the bytes here are the
/// reverse of the canonical `xxxxxxxx-xxxx-...` rendering. [`Self::to_uuid`]
/// and [`Self::from_uuid`] convert for host stacks that speak canonical UUIDs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceUuid([u8; 16]);

impl ServiceUuid {
    /// Parse 32 hex digits given in over-the-air order
    pub fn parse(hex_str: &str) -> Result<Self, GattError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| GattError::InvalidUuid(format!("{}: {}", hex_str, e)))?;
        let bytes: [u8; 16] = bytes.try_into().map_err(|v: Vec<u8>| {
            GattError::InvalidUuid(format!("expected 16 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Over-the-air bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Canonical UUID (big-endian) as used by host BLE stacks
    pub fn to_uuid(&self) -> Uuid {
        let mut be = self.0;
        be.reverse();
        Uuid::from_bytes(be)
    }

    /// Inverse of [`Self::to_uuid`]
    pub fn from_uuid(uuid: &Uuid) -> Self {
        let mut le = *uuid.as_bytes();
        le.reverse();
        Self(le)
    }
}

impl Default for ServiceUuid {
    fn default() -> Self {
        // The constant is 32 valid hex digits.
        Self::parse(DEFAULT_SERVICE_UUID).unwrap_or(Self([0u8; 16]))
    }
}

impl fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceUuid({})", hex::encode(self.0))
    }
}

/// Characteristic property bits (Bluetooth Core Vol 3, Part G, 3.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Local service published by the server role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceDef {
    pub uuid: ServiceUuid,
    pub characteristic_uuid: ServiceUuid,
    pub properties: CharacteristicProperties,
    pub value: Vec<u8>,
    /// Writes must match the value length exactly
    pub fixed_length: bool,
}

impl GattServiceDef {
    /// Token service: characteristic shares the service UUID, read + write
    pub fn token_service(uuid: ServiceUuid, value: Vec<u8>) -> Result<Self, GattError> {
        if value.is_empty() {
            return Err(GattError::EmptyValue);
        }
        if value.len() > MAX_CHARACTERISTIC_SIZE {
            return Err(GattError::ValueTooLarge(value.len()));
        }
        Ok(Self {
            uuid,
            characteristic_uuid: uuid,
            properties: CharacteristicProperties::READ.union(CharacteristicProperties::WRITE),
            value,
            fixed_length: true,
        })
    }

    /// Whether a peer write of `data` is acceptable
    pub fn accepts_write(&self, data: &[u8]) -> bool {
        self.properties.contains(CharacteristicProperties::WRITE)
            && (!self.fixed_length || data.len() == self.value.len())
    }
}

/// Characteristic found on a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    pub service_uuid: ServiceUuid,
    pub uuid: ServiceUuid,
    pub properties: CharacteristicProperties,
}

/// Service found on a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub uuid: ServiceUuid,
    pub characteristics: Vec<RemoteCharacteristic>,
}
