// Simmel Core: proximity exchange over BLE
//
// A device alternates between collecting the rotating identifiers of nearby
// peers (client phase) and serving its own identifier to them (server phase).
// Everything that touches the radio, the clock or the watchdog goes through
// an injected handle so the protocol runs the same on hardware and in tests.

pub mod config;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod token;
pub mod transport;

pub use config::{ConfigError, ProtocolConfig};
pub use platform::{Clock, RecordingWatchdog, SimClock, SoftwareWatchdog, TokioClock, Watchdog};
pub use scheduler::{
    ClientReport, Encounter, ProximityEvent, RoundReport, RoundScheduler, SchedulerError,
    ServerPhaseReport,
};
pub use store::{DedupScope, DedupStore};
pub use token::{RandomTokenProvider, Token, TokenProvider, DEFAULT_TOKEN_LEN};
pub use transport::{
    AdapterError, AdvertisingParams, BleAdapter, BleConnection, PeerAddress, ScanEntry,
    ScanParams, SimAdapter, SimAir, SimBeacon, SimBehavior, SimInbound, SimStats,
};
pub use transport::ble::{
    AdvertisingPayload, ExchangeMode, ServerOutcome, ServerReport, ServiceUuid, SessionError,
};
