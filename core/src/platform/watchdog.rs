//! Liveness watchdog
//!
//! The watchdog is the only recovery path from a lockup: if it is not fed
//! within its period the platform is reset. On a microcontroller that is a
//! hardware timer; on a host it is [`SoftwareWatchdog`], whose reset action
//! is supplied by the binary (typically terminating the process so a
//! supervisor restarts it).

use crate::platform::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// Default watchdog period (5 minutes)
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(300);

/// Liveness timer handle
pub trait Watchdog: Send + Sync {
    /// Acknowledge liveness; restarts the period
    fn feed(&self);

    /// Period after which an unfed watchdog resets the platform
    fn timeout(&self) -> Duration;
}

/// Watchdog running as a tokio task
pub struct SoftwareWatchdog {
    timeout: Duration,
    last_feed: Arc<Mutex<tokio::time::Instant>>,
    task: JoinHandle<()>,
}

impl SoftwareWatchdog {
    /// Arm the watchdog. Must be called from within a tokio runtime.
    ///
    /// `on_expire` runs once, on the watchdog task, when the period elapses
    /// without a feed. The watchdog stays tripped afterwards.
    pub fn arm<F>(timeout: Duration, on_expire: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let last_feed = Arc::new(Mutex::new(tokio::time::Instant::now()));
        let check_every = (timeout / 10).max(Duration::from_millis(1));
        let watched = Arc::clone(&last_feed);

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(check_every).await;
                let starved_for = watched.lock().elapsed();
                if starved_for >= timeout {
                    error!(
                        "Watchdog not fed for {:?} (period {:?}), resetting",
                        starved_for, timeout
                    );
                    on_expire();
                    return;
                }
            }
        });

        Self {
            timeout,
            last_feed,
            task,
        }
    }

    /// True once the reset action has run
    pub fn has_expired(&self) -> bool {
        self.task.is_finished()
    }
}

impl Watchdog for SoftwareWatchdog {
    fn feed(&self) {
        *self.last_feed.lock() = tokio::time::Instant::now();
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watchdog that records the clock time of every feed
///
/// Never resets anything; used to audit liveness in simulations and tests.
pub struct RecordingWatchdog {
    clock: Arc<dyn Clock>,
    timeout: Duration,
    feeds: Mutex<Vec<Duration>>,
}

impl RecordingWatchdog {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            clock,
            timeout,
            feeds: Mutex::new(Vec::new()),
        }
    }

    /// Clock readings at each feed, in order
    pub fn feeds(&self) -> Vec<Duration> {
        self.feeds.lock().clone()
    }

    /// Number of feeds so far
    pub fn feed_count(&self) -> usize {
        self.feeds.lock().len()
    }

    /// Longest stretch without a feed, counted from clock origin to now
    pub fn max_gap(&self) -> Duration {
        let feeds = self.feeds.lock();
        let mut last = Duration::ZERO;
        let mut max = Duration::ZERO;
        for &at in feeds.iter() {
            max = max.max(at.saturating_sub(last));
            last = at;
        }
        max.max(self.clock.now().saturating_sub(last))
    }

    /// True if a real watchdog with this period would have reset
    pub fn would_have_reset(&self) -> bool {
        self.max_gap() >= self.timeout
    }
}

impl Watchdog for RecordingWatchdog {
    fn feed(&self) {
        let now = self.clock.now();
        self.feeds.lock().push(now);
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
