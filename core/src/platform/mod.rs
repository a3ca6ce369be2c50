//! Platform handles injected into the scheduler
//!
//! The radio lives in [`crate::transport`]; this module holds the other two
//! pieces of platform state the protocol depends on:
//! - **clock**: monotonic time and the tick sleep
//! - **watchdog**: the liveness timer fed on every tick

pub mod clock;
pub mod watchdog;

pub use clock::{Clock, SimClock, TokioClock};
pub use watchdog::{RecordingWatchdog, SoftwareWatchdog, Watchdog, DEFAULT_WATCHDOG_TIMEOUT};
