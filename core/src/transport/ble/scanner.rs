/// Peer discovery scanner
///
/// Drives one bounded scan and yields the peers worth contacting: their
/// advertisement carries our service UUID, their signal clears the RSSI
/// floor, and their random hash is not in the dedup store yet.

use crate::platform::{Clock, Watchdog};
use crate::store::DedupStore;
use crate::transport::adapter::{AdapterError, BleAdapter, PeerAddress, ScanEntry, ScanParams};
use crate::transport::ble::gatt::ServiceUuid;
use crate::transport::ble::payload::{contains_service_uuid, find_rand_hash};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// BLE scanning configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Total scan duration in milliseconds (default 3s)
    pub duration_ms: u64,
    /// Scan interval in milliseconds (default 100ms)
    pub interval_ms: u64,
    /// Scan window in milliseconds (default 100ms)
    pub window_ms: u64,
    /// Weakest signal still considered, in dBm (default -80)
    pub min_rssi: i16,
    /// Request scan responses
    pub active: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration_ms: 3_000,
            interval_ms: 100,
            window_ms: 100,
            min_rssi: -80,
            active: true,
        }
    }
}

impl ScanConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.window_ms > self.interval_ms {
            return Err(ScannerError::InvalidScanConfig(
                "Scan window must be <= scan interval".to_string(),
            ));
        }
        if self.interval_ms == 0 || self.window_ms == 0 {
            return Err(ScannerError::InvalidScanConfig(
                "Scan intervals must be > 0".to_string(),
            ));
        }
        if self.duration_ms == 0 {
            return Err(ScannerError::InvalidScanConfig(
                "Scan duration must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Adapter parameters for a scan looking for `service_uuid`
    pub fn params(&self, service_uuid: ServiceUuid) -> ScanParams {
        ScanParams {
            service_uuid,
            duration: self.duration(),
            interval: self.interval(),
            window: self.window(),
            min_rssi: self.min_rssi,
            active: self.active,
        }
    }
}

/// Errors for scanner operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    #[error("Invalid scan configuration: {0}")]
    InvalidScanConfig(String),
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Scanner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Not scanning; the scan has ended
    Idle,
    /// Actively scanning
    Scanning,
    /// Radio scan stopped for a peer session, resumes on the next poll
    Paused,
}

/// A qualifying advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub address: PeerAddress,
    pub rssi: i16,
    pub advertisement: Vec<u8>,
    /// Little-endian nonce from the manufacturer record, 0 if absent
    pub rand_hash: u64,
}

impl DiscoveredPeer {
    /// Build from a scan entry, extracting the random hash
    pub fn from_entry(entry: ScanEntry) -> Self {
        let rand_hash = find_rand_hash(&entry.advertisement);
        Self {
            address: entry.address,
            rssi: entry.rssi,
            advertisement: entry.advertisement,
            rand_hash,
        }
    }
}

/// One bounded scan over an adapter
///
/// Acts as a lazy, finite sequence: [`PeerScanner::next`] returns `None` once
/// the scan duration has elapsed or the adapter failed. A finished scanner is
/// not restarted; start a new one instead. The watchdog is fed on every poll
/// tick, so a scan may run longer than the watchdog period.
pub struct PeerScanner<'a> {
    adapter: &'a dyn BleAdapter,
    clock: &'a dyn Clock,
    watchdog: &'a dyn Watchdog,
    service_uuid: ServiceUuid,
    config: ScanConfig,
    deadline: Duration,
    state: ScannerState,
}

impl<'a> PeerScanner<'a> {
    /// Start scanning for `service_uuid`
    pub async fn start(
        adapter: &'a dyn BleAdapter,
        clock: &'a dyn Clock,
        watchdog: &'a dyn Watchdog,
        service_uuid: ServiceUuid,
        config: ScanConfig,
    ) -> Result<PeerScanner<'a>, ScannerError> {
        config.validate()?;
        adapter.start_scan(&config.params(service_uuid)).await?;
        let deadline = clock.now() + config.duration();
        debug!("Scan started for {} (until {:?})", service_uuid, deadline);
        Ok(Self {
            adapter,
            clock,
            watchdog,
            service_uuid,
            config,
            deadline,
            state: ScannerState::Scanning,
        })
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Time left before the scan ends
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.clock.now())
    }

    /// Record that something else stopped the radio scan (a peer session)
    pub fn mark_suspended(&mut self) {
        if self.state == ScannerState::Scanning {
            self.state = ScannerState::Paused;
        }
    }

    /// Next peer worth contacting, or `None` when the scan is over
    pub async fn next(&mut self, seen: &DedupStore) -> Option<DiscoveredPeer> {
        loop {
            if self.state == ScannerState::Idle {
                return None;
            }
            if self.clock.now() >= self.deadline {
                self.finish().await;
                return None;
            }
            if self.state == ScannerState::Paused {
                let mut params = self.config.params(self.service_uuid);
                params.duration = self.remaining();
                if let Err(e) = self.adapter.start_scan(&params).await {
                    warn!("Could not resume scan: {}", e);
                    self.state = ScannerState::Idle;
                    return None;
                }
                self.state = ScannerState::Scanning;
            }

            match self.adapter.next_scan_entry().await {
                Ok(Some(entry)) => {
                    if let Some(peer) = self.qualify(entry, seen) {
                        return Some(peer);
                    }
                }
                Ok(None) => {
                    self.watchdog.feed();
                    self.clock.sleep(self.config.interval()).await;
                }
                Err(e) => {
                    warn!("Scan aborted: {}", e);
                    self.finish().await;
                    return None;
                }
            }
        }
    }

    fn qualify(&self, entry: ScanEntry, seen: &DedupStore) -> Option<DiscoveredPeer> {
        if !contains_service_uuid(&entry.advertisement, &self.service_uuid) {
            return None;
        }
        if entry.rssi < self.config.min_rssi {
            trace!("Ignoring {} at {} dBm", entry.address, entry.rssi);
            return None;
        }
        let peer = DiscoveredPeer::from_entry(entry);
        if seen.contains(peer.rand_hash) {
            trace!("Already seen {:06x} from {}", peer.rand_hash, peer.address);
            return None;
        }
        Some(peer)
    }

    /// End the scan
    pub async fn finish(&mut self) {
        if self.state == ScannerState::Idle {
            return;
        }
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan failed: {}", e);
        }
        self.state = ScannerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{RecordingWatchdog, SimClock};
    use crate::store::DedupScope;
    use crate::transport::sim::{SimAdapter, SimAir, SimBeacon};
    use std::sync::Arc;

    fn beacon_adv(uuid: &ServiceUuid, nonce: [u8; 3]) -> Vec<u8> {
        let mut adv = vec![0x11, 0x07];
        adv.extend_from_slice(uuid.as_bytes());
        adv.extend_from_slice(&[0x02, 0x01, 0x06, 0x02, 0x0a, 0x00, 0x06, 0xff, 0xff, 0x03]);
        adv.extend_from_slice(&nonce);
        adv
    }

    fn setup() -> (Arc<SimClock>, Arc<SimAir>, SimAdapter) {
        let clock = Arc::new(SimClock::new());
        let air = SimAir::new(clock.clone());
        let adapter = SimAdapter::new(&air, PeerAddress::new("b0:00:00:00:00:01"));
        (clock, air, adapter)
    }

    fn watchdog(clock: &Arc<SimClock>) -> RecordingWatchdog {
        RecordingWatchdog::new(clock.clone(), Duration::from_secs(300))
    }

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert_eq!(config.duration_ms, 3_000);
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.window_ms, 100);
        assert_eq!(config.min_rssi, -80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_config_window_exceeds_interval() {
        let config = ScanConfig {
            interval_ms: 100,
            window_ms: 200,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_config_zero_values() {
        let config = ScanConfig {
            interval_ms: 0,
            window_ms: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
        let config = ScanConfig {
            duration_ms: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_scanner_yields_matching_peer_once() {
        let (clock, air, adapter) = setup();
        let uuid = ServiceUuid::default();
        air.add_beacon(SimBeacon::new(
            PeerAddress::new("a0:00:00:00:00:01"),
            beacon_adv(&uuid, [0x01, 0x02, 0x03]),
            -60,
        ));

        let mut seen = DedupStore::new(DedupScope::Phase);
        let wdt = watchdog(&clock);
        let mut scanner = PeerScanner::start(&adapter, &*clock, &wdt, uuid, ScanConfig::default())
            .await
            .unwrap();

        let peer = scanner.next(&seen).await.expect("beacon discovered");
        assert_eq!(peer.rand_hash, 0x030201);
        assert_eq!(peer.rssi, -60);
        seen.insert(peer.rand_hash);

        assert!(scanner.next(&seen).await.is_none());
        assert_eq!(scanner.state(), ScannerState::Idle);
        assert!(clock.now() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_scanner_filters_foreign_uuid_and_weak_signal() {
        let (clock, air, adapter) = setup();
        let uuid = ServiceUuid::default();
        let foreign = ServiceUuid::from_bytes([0x42; 16]);
        air.add_beacon(SimBeacon::new(
            PeerAddress::new("a0:00:00:00:00:02"),
            beacon_adv(&foreign, [9, 9, 9]),
            -40,
        ));
        air.add_beacon(SimBeacon::new(
            PeerAddress::new("a0:00:00:00:00:03"),
            beacon_adv(&uuid, [7, 7, 7]),
            -95,
        ));

        let seen = DedupStore::new(DedupScope::Phase);
        let wdt = watchdog(&clock);
        let mut scanner = PeerScanner::start(&adapter, &*clock, &wdt, uuid, ScanConfig::default())
            .await
            .unwrap();
        assert!(scanner.next(&seen).await.is_none());
    }

    #[tokio::test]
    async fn test_scanner_skips_known_hash() {
        let (clock, air, adapter) = setup();
        let uuid = ServiceUuid::default();
        air.add_beacon(SimBeacon::new(
            PeerAddress::new("a0:00:00:00:00:04"),
            beacon_adv(&uuid, [0xaa, 0xbb, 0xcc]),
            -50,
        ));

        let mut seen = DedupStore::new(DedupScope::Phase);
        seen.insert(0xccbbaa);
        let wdt = watchdog(&clock);
        let mut scanner = PeerScanner::start(&adapter, &*clock, &wdt, uuid, ScanConfig::default())
            .await
            .unwrap();
        assert!(scanner.next(&seen).await.is_none());
    }

    #[tokio::test]
    async fn test_scanner_resumes_after_suspension() {
        let (clock, air, adapter) = setup();
        let uuid = ServiceUuid::default();
        air.add_beacon(SimBeacon::new(
            PeerAddress::new("a0:00:00:00:00:05"),
            beacon_adv(&uuid, [1, 0, 0]),
            -50,
        ));
        air.add_beacon(
            SimBeacon::new(
                PeerAddress::new("a0:00:00:00:00:06"),
                beacon_adv(&uuid, [2, 0, 0]),
                -50,
            )
            .visible_between(Duration::from_secs(1), Duration::from_secs(10)),
        );

        let mut seen = DedupStore::new(DedupScope::Phase);
        let wdt = watchdog(&clock);
        let mut scanner = PeerScanner::start(&adapter, &*clock, &wdt, uuid, ScanConfig::default())
            .await
            .unwrap();

        let first = scanner.next(&seen).await.unwrap();
        assert_eq!(first.rand_hash, 1);
        seen.insert(first.rand_hash);
        adapter.stop_scan().await.unwrap();
        scanner.mark_suspended();
        assert_eq!(scanner.state(), ScannerState::Paused);

        let second = scanner.next(&seen).await.unwrap();
        assert_eq!(second.rand_hash, 2);
        assert_eq!(adapter.stats().scans_started, 2);
    }

    #[tokio::test]
    async fn test_long_scan_feeds_watchdog_every_tick() {
        let (clock, _air, adapter) = setup();
        let wdt = watchdog(&clock);
        let config = ScanConfig {
            duration_ms: 400_000,
            ..ScanConfig::default()
        };

        let seen = DedupStore::new(DedupScope::Phase);
        let mut scanner = PeerScanner::start(&adapter, &*clock, &wdt, ServiceUuid::default(), config)
            .await
            .unwrap();
        assert!(scanner.next(&seen).await.is_none());

        assert!(clock.now() >= Duration::from_secs(400));
        assert!(wdt.max_gap() <= Duration::from_millis(100));
        assert!(!wdt.would_have_reset());
    }
}
