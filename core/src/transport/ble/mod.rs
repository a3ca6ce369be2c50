/// BLE (Bluetooth Low Energy) proximity exchange
///
/// Protocol-level pieces of the exchange, independent of any BLE stack:
///
/// - **payload**: advertising payload and scan response encoding, AD record parsing
/// - **gatt**: token service definition and the remote service view a client sees
/// - **scanner**: bounded discovery scan with RSSI and dedup filtering
/// - **session**: client-side connect, read (and optionally write back) of a peer token
/// - **server**: advertise and serve one connection per phase
///
/// Radio access goes through [`crate::transport::adapter::BleAdapter`], so all of
/// this runs unchanged over hardware or the simulated radio.

pub mod gatt;
pub mod payload;
pub mod scanner;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use gatt::{
    CharacteristicProperties, GattError, GattServiceDef, RemoteCharacteristic, RemoteService,
    ServiceUuid, DEFAULT_SERVICE_UUID, MAX_CHARACTERISTIC_SIZE,
};

pub use payload::{
    contains_service_uuid, find_rand_hash, scan_response, AdRecord, AdRecords,
    AdvertisingPayload, PayloadError, MAX_ADV_LEN,
};

pub use scanner::{DiscoveredPeer, PeerScanner, ScanConfig, ScannerError, ScannerState};

pub use server::{
    AdvertiserServer, ServerConfig, ServerError, ServerOutcome, ServerReport, ServerState,
};

pub use session::{ExchangeMode, PeerSessionClient, SessionError};
