//! Round scheduler
//!
//! Drives a device forever through rounds of
//!
//! 1. a client phase: one bounded scan, one session per new peer;
//! 2. a server phase: advertise and serve at most one connection.
//!
//! Phases never overlap. The dedup store, the round counter and the watchdog
//! are the only state carried from one phase to the next. Nothing that goes
//! wrong with a single peer or a single phase stops the loop: failures are
//! logged, reported and the next phase starts on time.

use crate::config::{ConfigError, ProtocolConfig};
use crate::platform::{Clock, Watchdog};
use crate::store::DedupStore;
use crate::token::{Token, TokenProvider};
use crate::transport::adapter::{AdapterError, BleAdapter, PeerAddress};
use crate::transport::ble::gatt::ServiceUuid;
use crate::transport::ble::scanner::PeerScanner;
use crate::transport::ble::server::{AdvertiserServer, ServerError, ServerOutcome, ServerReport};
use crate::transport::ble::session::{ExchangeMode, PeerSessionClient, SessionError};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Token provider hands out {provider}-byte tokens, configuration expects {configured}")]
    TokenLengthMismatch { provider: usize, configured: usize },
}

// ============================================================================
// EVENTS AND REPORTS
// ============================================================================

/// Everything observable a scheduler does, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximityEvent {
    PeerDiscovered {
        address: PeerAddress,
        rssi: i16,
        rand_hash: u64,
    },
    TokenRead {
        address: PeerAddress,
        rand_hash: u64,
        token: Token,
    },
    SessionFailed {
        address: PeerAddress,
        rand_hash: u64,
        error: SessionError,
    },
    /// A peer wrote a valid token to our characteristic
    TokenReceived { token: Token },
    /// A peer wrote something that is not a token
    WriteRejected { len: usize },
    PeerServed {
        outcome: ServerOutcome,
        served: Duration,
    },
    LocalTokenRotated { fingerprint: String },
    RoundCompleted { round: u64, encounters: usize },
}

/// A token successfully read from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encounter {
    pub address: PeerAddress,
    pub rssi: i16,
    pub rand_hash: u64,
    pub token: Token,
}

/// Result of one client phase
#[derive(Debug, Clone, Default)]
pub struct ClientReport {
    /// Qualifying, not yet seen advertisements
    pub discovered: usize,
    /// Sessions attempted
    pub attempts: usize,
    pub encounters: Vec<Encounter>,
    pub failures: usize,
}

/// Result of one server phase
#[derive(Debug, Clone, Default)]
pub struct ServerPhaseReport {
    /// `None` when the phase could not run (adapter error)
    pub report: Option<ServerReport>,
    /// Valid tokens written by peers
    pub received: Vec<Token>,
    pub rejected_writes: usize,
}

/// Result of one full round
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u64,
    pub client: ClientReport,
    pub server: ServerPhaseReport,
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Owner of every platform handle; runs rounds
pub struct RoundScheduler {
    config: ProtocolConfig,
    service_uuid: ServiceUuid,
    adapter: Arc<dyn BleAdapter>,
    clock: Arc<dyn Clock>,
    watchdog: Arc<dyn Watchdog>,
    tokens: Box<dyn TokenProvider>,
    server: AdvertiserServer,
    dedup: DedupStore,
    round: u64,
    installed: bool,
    token_issued_at: Duration,
    events: Option<UnboundedSender<ProximityEvent>>,
}

impl RoundScheduler {
    /// Validate `config` and take ownership of the platform handles
    pub fn new(
        config: ProtocolConfig,
        adapter: Arc<dyn BleAdapter>,
        clock: Arc<dyn Clock>,
        watchdog: Arc<dyn Watchdog>,
        mut tokens: Box<dyn TokenProvider>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        if tokens.token_len() != config.token_len {
            return Err(SchedulerError::TokenLengthMismatch {
                provider: tokens.token_len(),
                configured: config.token_len,
            });
        }

        let service_uuid = config.service_uuid()?;
        let token = tokens.next_token();
        let server = AdvertiserServer::new(service_uuid, config.server_config(), token);
        let dedup = DedupStore::new(config.dedup_scope);
        let token_issued_at = clock.now();

        Ok(Self {
            config,
            service_uuid,
            adapter,
            clock,
            watchdog,
            tokens,
            server,
            dedup,
            round: 0,
            installed: false,
            token_issued_at,
            events: None,
        })
    }

    /// Report every [`ProximityEvent`] on `tx`
    pub fn with_events(mut self, tx: UnboundedSender<ProximityEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Draw advertising nonces from `rng`
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        let token = self.server.token().clone();
        self.server =
            AdvertiserServer::with_rng(self.service_uuid, self.config.server_config(), token, rng);
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Rounds completed so far
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Token currently served
    pub fn local_token(&self) -> &Token {
        self.server.token()
    }

    fn emit(&self, event: ProximityEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(event);
        }
    }

    /// Scan once and read the token of every new peer
    pub async fn run_client_phase(&mut self) -> ClientReport {
        let adapter = self.adapter.clone();
        let clock = self.clock.clone();
        let watchdog = self.watchdog.clone();
        let mut report = ClientReport::default();

        info!("Client phase: scanning for {}", self.service_uuid);

        let scan_config = self.config.scan_config();
        let scan_duration = scan_config.duration();
        let mut scanner = match PeerScanner::start(
            adapter.as_ref(),
            clock.as_ref(),
            watchdog.as_ref(),
            self.service_uuid,
            scan_config,
        )
        .await
        {
            Ok(scanner) => scanner,
            Err(e) => {
                // Sit out the phase unfed so a dead radio ends in a reset.
                warn!("Could not start scan: {}", e);
                clock.sleep(scan_duration).await;
                return report;
            }
        };
        self.watchdog.feed();

        let client = PeerSessionClient::new(adapter.as_ref(), self.service_uuid);
        let connect_timeout = self.config.connect_timeout();

        while let Some(peer) = scanner.next(&self.dedup).await {
            report.discovered += 1;
            info!(
                "Found peer {} ({} dBm, hash {:06x})",
                peer.address, peer.rssi, peer.rand_hash
            );
            self.emit(ProximityEvent::PeerDiscovered {
                address: peer.address.clone(),
                rssi: peer.rssi,
                rand_hash: peer.rand_hash,
            });

            report.attempts += 1;
            let result = match self.config.exchange_mode {
                ExchangeMode::ReadOnly => {
                    client.connect_and_read(&peer.address, connect_timeout).await
                }
                ExchangeMode::Bidirectional => {
                    client
                        .exchange(&peer.address, connect_timeout, self.server.token())
                        .await
                }
            };
            // The session stopped the radio scan; the scanner restarts it.
            scanner.mark_suspended();
            self.dedup.insert(peer.rand_hash);

            let result = result.and_then(|token| {
                if self.tokens.validate(token.as_bytes()) {
                    Ok(token)
                } else {
                    Err(SessionError::InvalidToken(token.len()))
                }
            });

            match result {
                Ok(token) => {
                    info!("Read token {} from {}", token.fingerprint(), peer.address);
                    self.emit(ProximityEvent::TokenRead {
                        address: peer.address.clone(),
                        rand_hash: peer.rand_hash,
                        token: token.clone(),
                    });
                    report.encounters.push(Encounter {
                        address: peer.address,
                        rssi: peer.rssi,
                        rand_hash: peer.rand_hash,
                        token,
                    });
                }
                Err(error) => {
                    warn!("Session with {} failed: {}", peer.address, error);
                    report.failures += 1;
                    self.emit(ProximityEvent::SessionFailed {
                        address: peer.address,
                        rand_hash: peer.rand_hash,
                        error,
                    });
                }
            }
            self.watchdog.feed();
        }

        debug!(
            "Client phase done: {} discovered, {} read, {} failed",
            report.discovered,
            report.encounters.len(),
            report.failures
        );
        report
    }

    async fn rotate_token_if_due(&mut self) {
        let Some(period) = self.config.token_rotation() else {
            return;
        };
        let now = self.clock.now();
        if now.saturating_sub(self.token_issued_at) < period {
            return;
        }
        let token = self.tokens.next_token();
        let fingerprint = token.fingerprint();
        match self.server.rotate_token(self.adapter.as_ref(), token).await {
            Ok(()) => {
                self.token_issued_at = now;
                self.emit(ProximityEvent::LocalTokenRotated { fingerprint });
            }
            Err(e) => warn!("Token rotation failed: {}", e),
        }
    }

    /// Advertise and serve one connection
    pub async fn run_server_phase(&mut self) -> ServerPhaseReport {
        let adapter = self.adapter.clone();
        let clock = self.clock.clone();
        let watchdog = self.watchdog.clone();
        let mut phase = ServerPhaseReport::default();
        let bounds = self.config.server_config();
        let phase_bound = bounds
            .advertising_timeout
            .saturating_add(bounds.connection_timeout);

        if !self.installed {
            match self.server.install(adapter.as_ref()).await {
                Ok(()) => self.installed = true,
                // Central-only stacks never serve; the round goes on without it.
                Err(ServerError::Adapter(AdapterError::Unsupported(what))) => {
                    debug!("Skipping server phase: {} unsupported", what);
                    return phase;
                }
                Err(e) => {
                    warn!("Could not publish token service: {}", e);
                    clock.sleep(phase_bound).await;
                    return phase;
                }
            }
        } else {
            self.rotate_token_if_due().await;
        }

        let report = match self
            .server
            .run_phase(adapter.as_ref(), clock.as_ref(), watchdog.as_ref())
            .await
        {
            Ok(report) => report,
            Err(e) => {
                // No feed: a radio that never comes back must trip the watchdog.
                warn!("Server phase failed: {}", e);
                clock.sleep(phase_bound).await;
                return phase;
            }
        };

        for value in &report.peer_writes {
            if self.tokens.validate(value) {
                let token = Token::from_bytes(value.clone());
                info!("Peer wrote token {}", token.fingerprint());
                self.emit(ProximityEvent::TokenReceived {
                    token: token.clone(),
                });
                phase.received.push(token);
            } else {
                warn!("Rejected {}-byte peer write", value.len());
                self.emit(ProximityEvent::WriteRejected { len: value.len() });
                phase.rejected_writes += 1;
            }
        }

        if matches!(
            report.outcome,
            ServerOutcome::PeerDisconnected | ServerOutcome::ConnectionTimedOut
        ) {
            self.emit(ProximityEvent::PeerServed {
                outcome: report.outcome,
                served: report.served,
            });
        }

        phase.report = Some(report);
        phase
    }

    /// One client phase followed by one server phase
    pub async fn run_round(&mut self) -> RoundReport {
        let round = self.round + 1;
        info!("Round {} starting", round);

        let client = self.run_client_phase().await;
        let server = self.run_server_phase().await;

        self.dedup.end_round();
        self.round = round;
        self.emit(ProximityEvent::RoundCompleted {
            round,
            encounters: client.encounters.len(),
        });

        RoundReport {
            round,
            client,
            server,
        }
    }

    /// Run `n` rounds and collect their reports
    pub async fn run_rounds(&mut self, n: u64) -> Vec<RoundReport> {
        let mut reports = Vec::with_capacity(n as usize);
        for _ in 0..n {
            reports.push(self.run_round().await);
        }
        reports
    }

    /// Run rounds until the process ends
    pub async fn run(&mut self) {
        loop {
            self.run_round().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{RecordingWatchdog, SimClock};
    use crate::store::DedupScope;
    use crate::token::RandomTokenProvider;
    use crate::transport::ble::gatt::{CharacteristicProperties, GattServiceDef};
    use crate::transport::ble::payload::AdvertisingPayload;
    use crate::transport::sim::{SimAdapter, SimAir, SimBeacon, SimBehavior, SimInbound};
    use rand::SeedableRng;

    struct Fixture {
        clock: Arc<SimClock>,
        air: Arc<SimAir>,
        adapter: Arc<SimAdapter>,
        watchdog: Arc<RecordingWatchdog>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(SimClock::new());
        let air = SimAir::new(clock.clone());
        let adapter = Arc::new(SimAdapter::new(&air, PeerAddress::new("b0:00:00:00:00:01")));
        let watchdog = Arc::new(RecordingWatchdog::new(clock.clone(), Duration::from_secs(300)));
        Fixture {
            clock,
            air,
            adapter,
            watchdog,
        }
    }

    fn scheduler(f: &Fixture, config: ProtocolConfig) -> RoundScheduler {
        RoundScheduler::new(
            config,
            f.adapter.clone(),
            f.clock.clone(),
            f.watchdog.clone(),
            Box::new(RandomTokenProvider::with_seed(160, 1)),
        )
        .unwrap()
        .with_rng(StdRng::seed_from_u64(2))
    }

    fn peer_beacon(address: &str, seed: u64, behavior: SimBehavior) -> SimBeacon {
        let uuid = ServiceUuid::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let payload = AdvertisingPayload::build(&uuid, 0, &mut rng).unwrap();
        let service = GattServiceDef::token_service(uuid, vec![seed as u8; 160]).unwrap();
        SimBeacon::new(PeerAddress::new(address), payload.as_bytes().to_vec(), -60)
            .with_service(service)
            .with_behavior(behavior)
    }

    #[test]
    fn test_rejects_mismatched_token_length() {
        let f = fixture();
        let result = RoundScheduler::new(
            ProtocolConfig::default(),
            f.adapter.clone(),
            f.clock.clone(),
            f.watchdog.clone(),
            Box::new(RandomTokenProvider::with_seed(32, 1)),
        );
        assert!(matches!(
            result,
            Err(SchedulerError::TokenLengthMismatch {
                provider: 32,
                configured: 160
            })
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let f = fixture();
        let config = ProtocolConfig {
            service_uuid: "zz".to_string(),
            ..Default::default()
        };
        let result = RoundScheduler::new(
            config,
            f.adapter.clone(),
            f.clock.clone(),
            f.watchdog.clone(),
            Box::new(RandomTokenProvider::with_seed(160, 1)),
        );
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[tokio::test]
    async fn test_client_phase_reads_each_peer_once() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::Normal));
        f.air.add_beacon(peer_beacon("a0:02", 2, SimBehavior::Normal));
        let mut s = scheduler(&f, ProtocolConfig::default());

        let report = s.run_client_phase().await;

        assert_eq!(report.attempts, 2);
        assert_eq!(report.encounters.len(), 2);
        assert_eq!(report.failures, 0);
        assert_eq!(f.adapter.stats().connect_attempts, 2);
        assert_eq!(s.dedup().len(), 2);
        assert!(f.clock.now() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_failing_peers_do_not_abort_scan() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:02", 2, SimBehavior::DropDuringRead));
        f.air.add_beacon(peer_beacon("a0:03", 3, SimBehavior::NoService));
        f.air.add_beacon(peer_beacon("a0:04", 4, SimBehavior::Normal));
        // Heard last: its connect timeout outlasts the scan
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::RefuseConnect));
        let mut s = scheduler(&f, ProtocolConfig::default());

        let report = s.run_client_phase().await;

        assert_eq!(report.attempts, 4);
        assert_eq!(report.failures, 3);
        assert_eq!(report.encounters.len(), 1);
        assert_eq!(report.encounters[0].address, PeerAddress::new("a0:04"));
        // Failed peers are remembered as well
        assert_eq!(s.dedup().len(), 4);
    }

    #[tokio::test]
    async fn test_cloned_advertisement_gets_one_session() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 9, SimBehavior::Normal));
        f.air.add_beacon(peer_beacon("a0:02", 9, SimBehavior::Normal));
        let mut s = scheduler(&f, ProtocolConfig::default());

        let report = s.run_client_phase().await;
        assert_eq!(report.attempts, 1);
        assert_eq!(f.adapter.stats().connect_attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_peer_token_is_a_failure() {
        let f = fixture();
        let uuid = ServiceUuid::default();
        let mut rng = StdRng::seed_from_u64(5);
        let payload = AdvertisingPayload::build(&uuid, 0, &mut rng).unwrap();
        let service = GattServiceDef::token_service(uuid, vec![1; 16]).unwrap();
        f.air.add_beacon(
            SimBeacon::new(PeerAddress::new("a0:05"), payload.as_bytes().to_vec(), -50)
                .with_service(service),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut s = scheduler(&f, ProtocolConfig::default()).with_events(tx);

        let report = s.run_client_phase().await;
        assert_eq!(report.failures, 1);

        let mut failed = None;
        while let Ok(event) = rx.try_recv() {
            if let ProximityEvent::SessionFailed { error, .. } = event {
                failed = Some(error);
            }
        }
        assert_eq!(failed, Some(SessionError::InvalidToken(16)));
    }

    #[tokio::test]
    async fn test_bidirectional_writes_local_token() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::Normal));
        let config = ProtocolConfig {
            exchange_mode: ExchangeMode::Bidirectional,
            ..Default::default()
        };
        let mut s = scheduler(&f, config);

        s.run_client_phase().await;
        assert_eq!(
            f.air.beacon_writes(&PeerAddress::new("a0:01")),
            vec![s.local_token().as_bytes().to_vec()]
        );
    }

    #[tokio::test]
    async fn test_server_phase_surfaces_peer_writes() {
        let f = fixture();
        let mut s = scheduler(&f, ProtocolConfig::default());
        f.adapter.schedule_inbound(
            SimInbound::after(Duration::from_secs(1))
                .hold_for(Duration::from_secs(1))
                .with_write(vec![0x42; 160]),
        );
        f.adapter.schedule_inbound(
            SimInbound::after(Duration::from_secs(1)).with_write(vec![0x42; 3]),
        );

        let phase = s.run_server_phase().await;

        assert_eq!(phase.received, vec![Token::from_bytes(vec![0x42; 160])]);
        assert_eq!(phase.rejected_writes, 1);
        assert_eq!(
            f.adapter.published_value(),
            Some(s.local_token().as_bytes().to_vec())
        );
    }

    #[tokio::test]
    async fn test_dedup_scope_applied_between_rounds() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::Normal));
        let config = ProtocolConfig {
            dedup_scope: DedupScope::Phase,
            ..Default::default()
        };
        let mut s = scheduler(&f, config);

        let reports = s.run_rounds(2).await;
        assert_eq!(reports[0].client.encounters.len(), 1);
        assert_eq!(reports[1].client.encounters.len(), 1);
        assert_eq!(s.round(), 2);
    }

    #[tokio::test]
    async fn test_rolling_scope_skips_next_round() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::Normal));
        let mut s = scheduler(&f, ProtocolConfig::default());

        let reports = s.run_rounds(3).await;
        let read: Vec<usize> = reports.iter().map(|r| r.client.encounters.len()).collect();
        assert_eq!(read, vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_token_rotation() {
        let f = fixture();
        let config = ProtocolConfig {
            token_rotation_secs: Some(10),
            ..Default::default()
        };
        let mut s = scheduler(&f, config);
        let first = s.local_token().clone();

        // Round 1 publishes; round 2's server phase starts at 16s and rotates.
        s.run_rounds(2).await;
        assert_ne!(s.local_token(), &first);
        assert_eq!(
            f.adapter.published_value(),
            Some(s.local_token().as_bytes().to_vec())
        );
    }

    #[tokio::test]
    async fn test_full_round_keeps_watchdog_fed() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::RefuseConnect));
        f.air.add_beacon(peer_beacon("a0:02", 2, SimBehavior::Normal));
        let mut s = scheduler(&f, ProtocolConfig::default());

        s.run_rounds(3).await;
        assert!(f.watchdog.max_gap() < Duration::from_secs(300));
        assert!(!f.watchdog.would_have_reset());
    }

    #[tokio::test]
    async fn test_round_events_in_order() {
        let f = fixture();
        f.air.add_beacon(peer_beacon("a0:01", 1, SimBehavior::Normal));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut s = scheduler(&f, ProtocolConfig::default()).with_events(tx);

        s.run_round().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], ProximityEvent::PeerDiscovered { .. }));
        assert!(matches!(events[1], ProximityEvent::TokenRead { .. }));
        assert!(matches!(
            events.last(),
            Some(ProximityEvent::RoundCompleted {
                round: 1,
                encounters: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_long_scan_stays_fed() {
        let f = fixture();
        let config = ProtocolConfig {
            scan_timeout_secs: 290,
            ..Default::default()
        };
        let mut s = scheduler(&f, config);

        s.run_client_phase().await;
        assert!(f.clock.now() >= Duration::from_secs(290));
        assert!(f.watchdog.max_gap() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_adapter_starves_watchdog() {
        let f = fixture();
        f.adapter.set_enabled(false);
        let mut s = scheduler(&f, ProtocolConfig::default());

        let reports = s.run_rounds(20).await;

        // Each round still takes the scan plus the server bound.
        assert_eq!(f.clock.now(), Duration::from_secs(20 * (3 + 10 + 5)));
        assert_eq!(f.watchdog.feed_count(), 0);
        assert!(f.watchdog.would_have_reset());
        assert!(reports.iter().all(|r| r.server.report.is_none()));
    }

    #[tokio::test]
    async fn test_failed_write_back_keeps_read_token() {
        let f = fixture();
        let uuid = ServiceUuid::default();
        let mut rng = StdRng::seed_from_u64(5);
        let payload = AdvertisingPayload::build(&uuid, 0, &mut rng).unwrap();
        let mut service = GattServiceDef::token_service(uuid, vec![5; 160]).unwrap();
        service.properties = CharacteristicProperties::READ;
        f.air.add_beacon(
            SimBeacon::new(PeerAddress::new("a0:05"), payload.as_bytes().to_vec(), -60)
                .with_service(service),
        );
        let config = ProtocolConfig {
            exchange_mode: ExchangeMode::Bidirectional,
            ..Default::default()
        };
        let mut s = scheduler(&f, config);

        let report = s.run_client_phase().await;
        assert_eq!(report.failures, 0);
        assert_eq!(report.encounters.len(), 1);
        assert_eq!(report.encounters[0].token.as_bytes(), &[5u8; 160][..]);
        assert!(f.air.beacon_writes(&PeerAddress::new("a0:05")).is_empty());
    }
}
