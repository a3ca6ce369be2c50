// Transport module: radio abstraction, BLE protocol pieces and the simulated radio

pub mod adapter;
pub mod ble;
pub mod sim;

pub use adapter::{
    AdapterError, AdvertisingParams, BleAdapter, BleConnection, PeerAddress, ScanEntry,
    ScanParams,
};
pub use sim::{SimAdapter, SimAir, SimBeacon, SimBehavior, SimInbound, SimStats};
