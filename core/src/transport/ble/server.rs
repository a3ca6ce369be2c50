/// Advertiser / responder (server role)
///
/// One server phase walks the state machine
///
/// ```text
/// Idle -> Advertising -> (timeout)   -> Idle
///                     -> (connected) -> Serving -> Disconnected -> Idle
/// ```
///
/// Advertising stops as soon as a peer connects. Serving is capped by the
/// connection lifetime measured from entry into `Serving`, whatever the
/// traffic; a peer hanging up earlier ends it at the next tick. Every tick of
/// both wait loops feeds the watchdog exactly once.

use crate::platform::{Clock, Watchdog};
use crate::token::Token;
use crate::transport::adapter::{AdapterError, AdvertisingParams, BleAdapter};
use crate::transport::ble::gatt::{GattError, GattServiceDef, ServiceUuid};
use crate::transport::ble::payload::{scan_response, AdvertisingPayload, PayloadError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that end a server phase early
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("GATT error: {0}")]
    Gatt(#[from] GattError),
}

/// Server timing and identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Adapter stops advertising after this long (default 10s)
    pub advertising_timeout: Duration,
    /// Advertising interval (default 100ms)
    pub advertising_interval: Duration,
    /// Hard ceiling on a served connection (default 5s)
    pub connection_timeout: Duration,
    /// Wait-loop tick (default 1s)
    pub tick: Duration,
    /// Name placed in the scan response; `None` advertises anonymously
    pub adapter_name: Option<String>,
    pub tx_power_dbm: i8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            advertising_timeout: Duration::from_secs(10),
            advertising_interval: Duration::from_millis(100),
            connection_timeout: Duration::from_secs(5),
            tick: Duration::from_secs(1),
            adapter_name: Some("Simmel".to_string()),
            tx_power_dbm: 0,
        }
    }
}

/// Server state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Idle,
    Advertising,
    Serving,
    Disconnected,
}

/// How a server phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerOutcome {
    /// Nobody connected before advertising ended
    AdvertisingTimedOut,
    /// The peer hung up while being served
    PeerDisconnected,
    /// The connection lifetime elapsed; the link was torn down
    ConnectionTimedOut,
    /// The radio went away mid-phase
    AdapterDisabled,
}

/// Summary of one server phase
#[derive(Debug, Clone)]
pub struct ServerReport {
    pub outcome: ServerOutcome,
    /// Time spent in `Serving`
    pub served: Duration,
    /// Wait-loop ticks (one watchdog feed each)
    pub ticks: u64,
    pub payload: AdvertisingPayload,
    /// Values peers wrote to our characteristic during the phase
    pub peer_writes: Vec<Vec<u8>>,
}

/// Owner of the local token and the advertising side of the radio
pub struct AdvertiserServer {
    service_uuid: ServiceUuid,
    config: ServerConfig,
    token: Token,
    rng: StdRng,
    state: ServerState,
    transitions: Vec<(Duration, ServerState)>,
}

impl AdvertiserServer {
    pub fn new(service_uuid: ServiceUuid, config: ServerConfig, token: Token) -> Self {
        Self::with_rng(service_uuid, config, token, StdRng::from_entropy())
    }

    /// Use a specific RNG for advertising nonces
    pub fn with_rng(
        service_uuid: ServiceUuid,
        config: ServerConfig,
        token: Token,
        rng: StdRng,
    ) -> Self {
        Self {
            service_uuid,
            config,
            token,
            rng,
            state: ServerState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Token currently served
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// State changes of the last phase, with the clock time they happened
    pub fn transitions(&self) -> &[(Duration, ServerState)] {
        &self.transitions
    }

    /// Set the adapter name and publish the token service
    pub async fn install(&self, adapter: &dyn BleAdapter) -> Result<(), ServerError> {
        let name = self.config.adapter_name.as_deref().unwrap_or("");
        adapter.set_name(name).await?;
        self.publish(adapter).await
    }

    /// Replace the served token and republish the service
    pub async fn rotate_token(
        &mut self,
        adapter: &dyn BleAdapter,
        token: Token,
    ) -> Result<(), ServerError> {
        self.token = token;
        info!("Rotated local token to {}", self.token.fingerprint());
        self.publish(adapter).await
    }

    async fn publish(&self, adapter: &dyn BleAdapter) -> Result<(), ServerError> {
        let service = GattServiceDef::token_service(self.service_uuid, self.token.as_bytes().to_vec())?;
        adapter.publish_service(&service).await?;
        Ok(())
    }

    fn enter(&mut self, state: ServerState, clock: &dyn Clock) {
        self.state = state;
        self.transitions.push((clock.now(), state));
    }

    /// Advertise, serve at most one connection, then return to `Idle`
    pub async fn run_phase(
        &mut self,
        adapter: &dyn BleAdapter,
        clock: &dyn Clock,
        watchdog: &dyn Watchdog,
    ) -> Result<ServerReport, ServerError> {
        self.transitions.clear();

        // Fresh nonce for every session so broadcasts cannot be correlated.
        let payload = AdvertisingPayload::build(&self.service_uuid, self.config.tx_power_dbm, &mut self.rng)?;
        let scan_response = match &self.config.adapter_name {
            Some(name) => Some(scan_response(name)?),
            None => None,
        };
        let params = AdvertisingParams {
            data: payload.as_bytes().to_vec(),
            scan_response,
            connectable: true,
            anonymous: true,
            timeout: self.config.advertising_timeout,
            interval: self.config.advertising_interval,
        };

        adapter.start_advertising(&params).await?;
        self.enter(ServerState::Advertising, clock);
        info!("Advertising {} from {}", payload, adapter.address());

        let advertising_since = clock.now();
        let mut ticks = 0u64;
        while !adapter.is_connected()
            && adapter.is_enabled()
            && adapter.is_advertising()
            && clock.now().saturating_sub(advertising_since) < self.config.advertising_timeout
        {
            watchdog.feed();
            ticks += 1;
            debug!(
                "WC | uptime {:?} ticks {} token {}",
                clock.now(),
                ticks,
                self.token.fingerprint()
            );
            clock.sleep(self.config.tick).await;
        }

        let connected = adapter.is_connected();
        let enabled = adapter.is_enabled();
        if let Err(e) = adapter.stop_advertising().await {
            debug!("stop_advertising failed: {}", e);
        }

        if !connected {
            let mut peer_writes = Vec::new();
            peer_writes.extend(adapter.take_peer_writes().await);
            self.enter(ServerState::Idle, clock);
            let outcome = if enabled {
                info!("Advertising timed out without a connection");
                ServerOutcome::AdvertisingTimedOut
            } else {
                warn!("Adapter disabled while advertising");
                ServerOutcome::AdapterDisabled
            };
            return Ok(ServerReport {
                outcome,
                served: Duration::ZERO,
                ticks,
                payload,
                peer_writes,
            });
        }

        self.enter(ServerState::Serving, clock);
        info!("Peer connected, serving for at most {:?}", self.config.connection_timeout);

        let serving_since = clock.now();
        let mut peer_writes = Vec::new();
        while adapter.is_connected()
            && clock.now().saturating_sub(serving_since) < self.config.connection_timeout
        {
            watchdog.feed();
            ticks += 1;
            peer_writes.extend(adapter.take_peer_writes().await);
            debug!(
                "CN | uptime {:?} ticks {} links {}",
                clock.now(),
                ticks,
                adapter.connections()
            );
            clock.sleep(self.config.tick).await;
        }
        peer_writes.extend(adapter.take_peer_writes().await);
        let served = clock.now().saturating_sub(serving_since);

        let outcome = if adapter.is_connected() {
            info!("Connection timed out after {:?}, forcing disconnection", served);
            ServerOutcome::ConnectionTimedOut
        } else {
            ServerOutcome::PeerDisconnected
        };

        if let Err(e) = adapter.disconnect_all().await {
            warn!("Failed to drop inbound links: {}", e);
        }
        self.enter(ServerState::Disconnected, clock);
        info!("Disconnected from other device");
        self.enter(ServerState::Idle, clock);

        Ok(ServerReport {
            outcome,
            served,
            ticks,
            payload,
            peer_writes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{RecordingWatchdog, SimClock};
    use crate::transport::adapter::PeerAddress;
    use crate::transport::ble::payload::find_rand_hash;
    use crate::transport::sim::{SimAdapter, SimAir, SimInbound};
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<SimClock>,
        adapter: SimAdapter,
        watchdog: RecordingWatchdog,
        server: AdvertiserServer,
    }

    fn fixture(config: ServerConfig) -> Fixture {
        let clock = Arc::new(SimClock::new());
        let air = SimAir::new(clock.clone());
        let adapter = SimAdapter::new(&air, PeerAddress::new("5e:00:00:00:00:01"));
        let watchdog = RecordingWatchdog::new(clock.clone(), Duration::from_secs(300));
        let server = AdvertiserServer::with_rng(
            ServiceUuid::default(),
            config,
            Token::from_bytes(vec![0xab; 160]),
            StdRng::seed_from_u64(11),
        );
        Fixture {
            clock,
            adapter,
            watchdog,
            server,
        }
    }

    #[tokio::test]
    async fn test_advertising_times_out_without_connection() {
        let mut f = fixture(ServerConfig::default());
        f.server.install(&f.adapter).await.unwrap();

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        assert_eq!(report.outcome, ServerOutcome::AdvertisingTimedOut);
        assert_eq!(report.served, Duration::ZERO);
        assert_eq!(f.clock.now(), Duration::from_secs(10));
        assert_eq!(report.ticks, 10);
        assert_eq!(f.watchdog.feed_count(), 10);
        assert_eq!(f.server.state(), ServerState::Idle);
        assert!(!f.server
            .transitions()
            .iter()
            .any(|(_, s)| *s == ServerState::Serving));
        assert!(!f.adapter.is_advertising());
    }

    #[tokio::test]
    async fn test_advertises_payload_and_scan_response() {
        let mut f = fixture(ServerConfig::default());
        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        let stats = f.adapter.stats();
        assert_eq!(stats.advertisements.len(), 1);
        let params = &stats.advertisements[0];
        assert_eq!(params.data, report.payload.as_bytes());
        assert_eq!(find_rand_hash(&params.data), report.payload.rand_hash());
        assert_eq!(params.scan_response.as_deref(), Some(&b"\x07\x08Simmel"[..]));
        assert!(params.connectable);
        assert_eq!(params.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_anonymous_server_has_no_scan_response() {
        let mut f = fixture(ServerConfig {
            adapter_name: None,
            ..ServerConfig::default()
        });
        f.server.install(&f.adapter).await.unwrap();
        f.server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();
        let stats = f.adapter.stats();
        assert_eq!(stats.advertisements[0].scan_response, None);
        assert_eq!(stats.name.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_each_phase_uses_fresh_nonce() {
        let mut f = fixture(ServerConfig::default());
        let first = f.server.run_phase(&f.adapter, &*f.clock, &f.watchdog).await.unwrap();
        let second = f.server.run_phase(&f.adapter, &*f.clock, &f.watchdog).await.unwrap();
        assert_ne!(first.payload.nonce(), second.payload.nonce());
    }

    #[tokio::test]
    async fn test_serving_ends_when_peer_disconnects() {
        let mut f = fixture(ServerConfig::default());
        f.adapter
            .schedule_inbound(SimInbound::after(Duration::ZERO).hold_for(Duration::from_secs(3)));

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        assert_eq!(report.outcome, ServerOutcome::PeerDisconnected);
        assert_eq!(report.served, Duration::from_secs(3));
        assert_eq!(f.clock.now(), Duration::from_secs(3));
        let states: Vec<ServerState> = f.server.transitions().iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![
                ServerState::Advertising,
                ServerState::Serving,
                ServerState::Disconnected,
                ServerState::Idle
            ]
        );
        assert!(!f.adapter.is_advertising(), "advertising stops once connected");
    }

    #[tokio::test]
    async fn test_serving_is_capped_by_connection_timeout() {
        let mut f = fixture(ServerConfig::default());
        f.adapter
            .schedule_inbound(SimInbound::after(Duration::from_secs(2)));

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        assert_eq!(report.outcome, ServerOutcome::ConnectionTimedOut);
        assert_eq!(report.served, Duration::from_secs(5));
        assert_eq!(f.adapter.connections(), 0);
        assert_eq!(f.adapter.stats().disconnect_all_calls, 1);

        let serving_at = f
            .server
            .transitions()
            .iter()
            .find(|(_, s)| *s == ServerState::Serving)
            .map(|(t, _)| *t)
            .unwrap();
        assert_eq!(serving_at, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_serving_overshoots_by_at_most_one_tick() {
        let timeout = Duration::from_millis(4_500);
        let mut f = fixture(ServerConfig {
            connection_timeout: timeout,
            ..ServerConfig::default()
        });
        f.adapter.schedule_inbound(SimInbound::after(Duration::ZERO));

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        assert!(report.served >= timeout);
        assert!(report.served <= timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_peer_writes_are_collected() {
        let mut f = fixture(ServerConfig::default());
        f.server.install(&f.adapter).await.unwrap();
        f.adapter.schedule_inbound(
            SimInbound::after(Duration::from_secs(1))
                .hold_for(Duration::from_secs(2))
                .with_write(vec![0x33; 160]),
        );

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        assert_eq!(report.peer_writes, vec![vec![0x33; 160]]);
    }

    #[tokio::test]
    async fn test_serving_feeds_watchdog_every_tick() {
        let mut f = fixture(ServerConfig::default());
        f.adapter
            .schedule_inbound(SimInbound::after(Duration::from_secs(4)));

        let report = f
            .server
            .run_phase(&f.adapter, &*f.clock, &f.watchdog)
            .await
            .unwrap();

        // 4 ticks advertising + 5 ticks serving
        assert_eq!(report.ticks, 9);
        assert_eq!(f.watchdog.feed_count(), 9);
        assert!(f.watchdog.max_gap() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rotate_token_republishes() {
        let mut f = fixture(ServerConfig::default());
        f.server.install(&f.adapter).await.unwrap();
        f.server
            .rotate_token(&f.adapter, Token::from_bytes(vec![0x01; 160]))
            .await
            .unwrap();
        assert_eq!(f.adapter.published_value(), Some(vec![0x01; 160]));
        assert_eq!(f.server.token().as_bytes(), &[0x01; 160][..]);
    }

    #[tokio::test]
    async fn test_disabled_adapter_refuses_to_advertise() {
        let mut f = fixture(ServerConfig::default());
        f.adapter.set_enabled(false);
        let result = f.server.run_phase(&f.adapter, &*f.clock, &f.watchdog).await;
        assert!(matches!(
            result,
            Err(ServerError::Adapter(AdapterError::NotEnabled))
        ));
        assert_eq!(f.watchdog.feed_count(), 0);
        assert_eq!(f.server.state(), ServerState::Idle);
    }
}
