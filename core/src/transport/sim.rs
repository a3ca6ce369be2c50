//! In-memory radio
//!
//! A [`SimAir`] is a shared medium. Every [`SimAdapter`] registered on it is
//! a device that can advertise, scan, connect and serve exactly like a
//! hardware adapter would. [`SimBeacon`]s are scripted advertisers with a
//! fixed payload, an optional GATT service and a failure mode, used to put a
//! scanner in front of misbehaving peers.
//!
//! Time comes from the injected [`Clock`], so advertising timeouts, scan
//! refills and scripted inbound links all follow simulated time.

use crate::platform::Clock;
use crate::transport::adapter::{
    AdapterError, AdvertisingParams, BleAdapter, BleConnection, PeerAddress, ScanEntry, ScanParams,
};
use crate::transport::ble::gatt::{GattServiceDef, RemoteCharacteristic, RemoteService, ServiceUuid};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// RSSI reported for simulated devices
pub const SIM_DEVICE_RSSI: i16 = -55;

/// How a scripted beacon reacts to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimBehavior {
    #[default]
    Normal,
    /// Never answers; the connect attempt runs into its timeout
    RefuseConnect,
    /// Connects, but the link reports itself down straight away
    ReportsDisconnected,
    /// Connects without exposing any service
    NoService,
    /// Link drops while the characteristic is read
    DropDuringRead,
}

/// Scripted advertiser
#[derive(Debug, Clone)]
pub struct SimBeacon {
    address: PeerAddress,
    advertisement: Vec<u8>,
    rssi: i16,
    visible_from: Duration,
    visible_until: Option<Duration>,
    service: Option<GattServiceDef>,
    behavior: SimBehavior,
}

impl SimBeacon {
    pub fn new(address: PeerAddress, advertisement: Vec<u8>, rssi: i16) -> Self {
        Self {
            address,
            advertisement,
            rssi,
            visible_from: Duration::ZERO,
            visible_until: None,
            service: None,
            behavior: SimBehavior::Normal,
        }
    }

    /// Only heard in `[from, until)`
    pub fn visible_between(mut self, from: Duration, until: Duration) -> Self {
        self.visible_from = from;
        self.visible_until = Some(until);
        self
    }

    pub fn with_service(mut self, service: GattServiceDef) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_behavior(mut self, behavior: SimBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn visible_at(&self, now: Duration) -> bool {
        now >= self.visible_from && self.visible_until.map_or(true, |until| now < until)
    }
}

/// Scripted inbound connection for a device in the server role
///
/// Fires `after` the start of the advertising session it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimInbound {
    after: Duration,
    hold: Option<Duration>,
    write: Option<Vec<u8>>,
}

impl SimInbound {
    pub fn after(after: Duration) -> Self {
        Self {
            after,
            hold: None,
            write: None,
        }
    }

    /// Peer hangs up after `hold`; without it the peer stays until dropped
    pub fn hold_for(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Value the peer writes to our characteristic once connected
    pub fn with_write(mut self, value: Vec<u8>) -> Self {
        self.write = Some(value);
        self
    }
}

/// Counters and records kept per simulated device
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub name: Option<String>,
    pub advertisements: Vec<AdvertisingParams>,
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub connect_attempts: usize,
    pub outbound_disconnects: usize,
    pub inbound_connections: usize,
    pub disconnect_all_calls: usize,
}

#[derive(Debug)]
struct InboundLink {
    id: u64,
    expires_at: Option<Duration>,
}

#[derive(Debug)]
struct ScanSession {
    params: ScanParams,
    started: Duration,
    last_refill: Option<Duration>,
    queue: VecDeque<ScanEntry>,
}

#[derive(Debug)]
struct Device {
    enabled: bool,
    service: Option<GattServiceDef>,
    advertising: Option<(AdvertisingParams, Duration)>,
    scan: Option<ScanSession>,
    inbound: Vec<InboundLink>,
    scheduled: Vec<SimInbound>,
    peer_writes: Vec<Vec<u8>>,
    stats: SimStats,
}

impl Device {
    fn new() -> Self {
        Self {
            enabled: true,
            service: None,
            advertising: None,
            scan: None,
            inbound: Vec::new(),
            scheduled: Vec::new(),
            peer_writes: Vec::new(),
            stats: SimStats::default(),
        }
    }

    /// Apply everything that happened up to `now`
    fn settle(&mut self, now: Duration, next_link_id: &mut u64) {
        if let Some((params, started)) = &self.advertising {
            let started = *started;
            let ends = started + params.timeout;
            let mut fired = Vec::new();
            self.scheduled.retain(|inbound| {
                let at = started + inbound.after;
                if at <= now && at < ends {
                    fired.push(inbound.clone());
                    false
                } else {
                    true
                }
            });
            for inbound in fired {
                let at = started + inbound.after;
                *next_link_id += 1;
                self.inbound.push(InboundLink {
                    id: *next_link_id,
                    expires_at: inbound.hold.map(|hold| at + hold),
                });
                self.stats.inbound_connections += 1;
                if let Some(value) = inbound.write {
                    self.peer_writes.push(value);
                }
            }
            if now >= ends {
                self.advertising = None;
            }
        }

        self.inbound
            .retain(|link| link.expires_at.map_or(true, |at| now < at));

        if let Some(scan) = &self.scan {
            if now >= scan.started + scan.params.duration {
                self.scan = None;
            }
        }
    }

    fn power_off(&mut self) {
        self.enabled = false;
        self.advertising = None;
        self.scan = None;
        self.inbound.clear();
    }
}

#[derive(Debug, Default)]
struct AirState {
    devices: HashMap<PeerAddress, Device>,
    beacons: Vec<SimBeacon>,
    beacon_writes: HashMap<PeerAddress, Vec<Vec<u8>>>,
    next_link_id: u64,
}

impl AirState {
    fn settle_all(&mut self, now: Duration) {
        let mut next_link_id = self.next_link_id;
        for device in self.devices.values_mut() {
            device.settle(now, &mut next_link_id);
        }
        self.next_link_id = next_link_id;
    }

    fn device_mut(&mut self, address: &PeerAddress, now: Duration) -> Option<&mut Device> {
        let mut next_link_id = self.next_link_id;
        let device = self.devices.get_mut(address)?;
        device.settle(now, &mut next_link_id);
        self.next_link_id = next_link_id;
        Some(device)
    }

    /// Everything `listener` hears at `now`
    fn heard_by(&self, listener: &PeerAddress, now: Duration) -> Vec<ScanEntry> {
        let mut entries: Vec<ScanEntry> = self
            .devices
            .iter()
            .filter(|(address, _)| *address != listener)
            .filter_map(|(address, device)| {
                let (params, _) = device.advertising.as_ref()?;
                Some(ScanEntry {
                    address: address.clone(),
                    rssi: SIM_DEVICE_RSSI,
                    advertisement: params.data.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.address.cmp(&b.address));
        entries.extend(
            self.beacons
                .iter()
                .filter(|beacon| beacon.visible_at(now))
                .map(|beacon| ScanEntry {
                    address: beacon.address.clone(),
                    rssi: beacon.rssi,
                    advertisement: beacon.advertisement.clone(),
                }),
        );
        entries
    }
}

/// Shared simulated medium
pub struct SimAir {
    clock: Arc<dyn Clock>,
    state: Mutex<AirState>,
}

impl SimAir {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            state: Mutex::new(AirState::default()),
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn add_beacon(&self, beacon: SimBeacon) {
        debug!("Sim beacon {} on air", beacon.address);
        self.state.lock().beacons.push(beacon);
    }

    /// Values written to a beacon's characteristic
    pub fn beacon_writes(&self, address: &PeerAddress) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .beacon_writes
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    fn register(&self, address: PeerAddress) {
        self.state.lock().devices.insert(address, Device::new());
    }
}

/// Simulated device
pub struct SimAdapter {
    air: Arc<SimAir>,
    address: PeerAddress,
}

impl SimAdapter {
    /// Register a new device on `air`
    pub fn new(air: &Arc<SimAir>, address: PeerAddress) -> Self {
        air.register(address.clone());
        Self {
            air: air.clone(),
            address,
        }
    }

    fn with_device<T>(&self, f: impl FnOnce(&mut Device) -> T) -> Option<T> {
        let now = self.air.clock.now();
        let mut state = self.air.state.lock();
        state.device_mut(&self.address, now).map(f)
    }

    pub fn stats(&self) -> SimStats {
        self.with_device(|d| d.stats.clone()).unwrap_or_default()
    }

    /// Power the radio on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.with_device(|d| {
            if enabled {
                d.enabled = true;
            } else {
                d.power_off();
            }
        });
    }

    /// Queue an inbound connection for a coming advertising session
    pub fn schedule_inbound(&self, inbound: SimInbound) {
        self.with_device(|d| d.scheduled.push(inbound));
    }

    /// Value of the published characteristic
    pub fn published_value(&self) -> Option<Vec<u8>> {
        self.with_device(|d| d.service.as_ref().map(|s| s.value.clone()))
            .flatten()
    }

    fn require_enabled(&self) -> Result<(), AdapterError> {
        match self.with_device(|d| d.enabled) {
            Some(true) => Ok(()),
            _ => Err(AdapterError::NotEnabled),
        }
    }
}

enum ConnectPlan {
    Device { link_id: u64 },
    Beacon { behavior: SimBehavior },
    NoAnswer,
    Unknown,
}

#[async_trait]
impl BleAdapter for SimAdapter {
    fn address(&self) -> PeerAddress {
        self.address.clone()
    }

    fn is_enabled(&self) -> bool {
        self.with_device(|d| d.enabled).unwrap_or(false)
    }

    async fn set_name(&self, name: &str) -> Result<(), AdapterError> {
        self.with_device(|d| d.stats.name = Some(name.to_string()));
        Ok(())
    }

    async fn publish_service(&self, service: &GattServiceDef) -> Result<(), AdapterError> {
        self.with_device(|d| d.service = Some(service.clone()));
        Ok(())
    }

    async fn take_peer_writes(&self) -> Vec<Vec<u8>> {
        self.with_device(|d| std::mem::take(&mut d.peer_writes))
            .unwrap_or_default()
    }

    async fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), AdapterError> {
        self.require_enabled()?;
        let now = self.air.clock.now();
        self.with_device(|d| {
            d.stats.advertisements.push(params.clone());
            d.advertising = Some((params.clone(), now));
        });
        trace!("{} advertising {} bytes", self.address, params.data.len());
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        self.with_device(|d| d.advertising = None);
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.with_device(|d| d.advertising.is_some())
            .unwrap_or(false)
    }

    async fn start_scan(&self, params: &ScanParams) -> Result<(), AdapterError> {
        self.require_enabled()?;
        let now = self.air.clock.now();
        self.with_device(|d| {
            d.stats.scans_started += 1;
            d.scan = Some(ScanSession {
                params: params.clone(),
                started: now,
                last_refill: None,
                queue: VecDeque::new(),
            });
        });
        Ok(())
    }

    async fn next_scan_entry(&self) -> Result<Option<ScanEntry>, AdapterError> {
        let now = self.air.clock.now();
        let mut state = self.air.state.lock();
        state.settle_all(now);

        let refill = match state.devices.get(&self.address) {
            Some(Device {
                scan: Some(scan), ..
            }) => {
                scan.queue.is_empty()
                    && scan
                        .last_refill
                        .map_or(true, |at| now >= at + scan.params.interval)
            }
            Some(_) => return Ok(None),
            None => return Err(AdapterError::NotEnabled),
        };
        let heard = if refill {
            state.heard_by(&self.address, now)
        } else {
            Vec::new()
        };

        let scan = match state.devices.get_mut(&self.address).and_then(|d| d.scan.as_mut()) {
            Some(scan) => scan,
            None => return Ok(None),
        };
        if refill {
            scan.last_refill = Some(now);
            scan.queue.extend(heard);
        }
        Ok(scan.queue.pop_front())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.with_device(|d| {
            d.stats.scans_stopped += 1;
            d.scan = None;
        });
        Ok(())
    }

    async fn connect(
        &self,
        address: &PeerAddress,
        timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, AdapterError> {
        self.require_enabled()?;
        let now = self.air.clock.now();
        let plan = {
            let mut guard = self.air.state.lock();
            let state = &mut *guard;
            state.settle_all(now);
            if let Some(local) = state.devices.get_mut(&self.address) {
                local.stats.connect_attempts += 1;
            }

            let next_id = state.next_link_id + 1;
            let plan = if let Some(target) = state.devices.get_mut(address) {
                let connectable = target
                    .advertising
                    .as_ref()
                    .map_or(false, |(params, _)| params.connectable);
                if connectable && target.enabled {
                    target.inbound.push(InboundLink {
                        id: next_id,
                        expires_at: None,
                    });
                    target.stats.inbound_connections += 1;
                    ConnectPlan::Device { link_id: next_id }
                } else {
                    ConnectPlan::NoAnswer
                }
            } else if let Some(beacon) = state.beacons.iter().find(|b| &b.address == address) {
                if beacon.visible_at(now) {
                    ConnectPlan::Beacon {
                        behavior: beacon.behavior,
                    }
                } else {
                    ConnectPlan::NoAnswer
                }
            } else {
                ConnectPlan::Unknown
            };
            if matches!(plan, ConnectPlan::Device { .. }) {
                state.next_link_id = next_id;
            }
            plan
        };

        let behavior = match plan {
            ConnectPlan::Device { link_id } => {
                debug!("{} connected to {}", self.address, address);
                return Ok(Box::new(SimConnection {
                    air: self.air.clone(),
                    local: self.address.clone(),
                    remote: address.clone(),
                    link: RemoteEnd::Device { link_id },
                    behavior: SimBehavior::Normal,
                    open: true,
                }));
            }
            ConnectPlan::Beacon { behavior } => behavior,
            ConnectPlan::NoAnswer => SimBehavior::RefuseConnect,
            ConnectPlan::Unknown => {
                return Err(AdapterError::ConnectionFailed(format!(
                    "no such peer: {}",
                    address
                )))
            }
        };

        if behavior == SimBehavior::RefuseConnect {
            self.air.clock.sleep(timeout).await;
            return Err(AdapterError::Timeout(timeout));
        }
        Ok(Box::new(SimConnection {
            air: self.air.clone(),
            local: self.address.clone(),
            remote: address.clone(),
            link: RemoteEnd::Beacon,
            behavior,
            open: behavior != SimBehavior::ReportsDisconnected,
        }))
    }

    fn connections(&self) -> usize {
        self.with_device(|d| d.inbound.len()).unwrap_or(0)
    }

    async fn disconnect_all(&self) -> Result<(), AdapterError> {
        self.with_device(|d| {
            d.stats.disconnect_all_calls += 1;
            d.inbound.clear();
        });
        Ok(())
    }
}

enum RemoteEnd {
    Device { link_id: u64 },
    Beacon,
}

/// Client side of a simulated link
struct SimConnection {
    air: Arc<SimAir>,
    local: PeerAddress,
    remote: PeerAddress,
    link: RemoteEnd,
    behavior: SimBehavior,
    open: bool,
}

impl SimConnection {
    fn link_alive(&self) -> bool {
        if !self.open {
            return false;
        }
        match self.link {
            RemoteEnd::Beacon => true,
            RemoteEnd::Device { link_id } => {
                let now = self.air.clock.now();
                let mut state = self.air.state.lock();
                state
                    .device_mut(&self.remote, now)
                    .map_or(false, |d| d.inbound.iter().any(|l| l.id == link_id))
            }
        }
    }

    fn remote_service(&self) -> Option<GattServiceDef> {
        let state = self.air.state.lock();
        match self.link {
            RemoteEnd::Device { .. } => state
                .devices
                .get(&self.remote)
                .and_then(|d| d.service.clone()),
            RemoteEnd::Beacon => state
                .beacons
                .iter()
                .find(|b| b.address == self.remote)
                .and_then(|b| b.service.clone()),
        }
    }
}

#[async_trait]
impl BleConnection for SimConnection {
    fn address(&self) -> &PeerAddress {
        &self.remote
    }

    async fn is_connected(&self) -> bool {
        self.link_alive()
    }

    async fn discover_services(
        &mut self,
        filter: &[ServiceUuid],
    ) -> Result<Vec<RemoteService>, AdapterError> {
        if !self.link_alive() {
            return Err(AdapterError::NotConnected);
        }
        if self.behavior == SimBehavior::NoService {
            return Ok(Vec::new());
        }
        let services = self
            .remote_service()
            .filter(|s| filter.is_empty() || filter.contains(&s.uuid))
            .map(|s| RemoteService {
                uuid: s.uuid,
                characteristics: vec![RemoteCharacteristic {
                    service_uuid: s.uuid,
                    uuid: s.characteristic_uuid,
                    properties: s.properties,
                }],
            })
            .into_iter()
            .collect();
        Ok(services)
    }

    async fn read(
        &mut self,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Vec<u8>, AdapterError> {
        if self.behavior == SimBehavior::DropDuringRead {
            self.open = false;
            return Err(AdapterError::Gatt("link dropped during read".to_string()));
        }
        if !self.link_alive() {
            return Err(AdapterError::NotConnected);
        }
        match self.remote_service() {
            Some(service) if service.characteristic_uuid == characteristic.uuid => {
                Ok(service.value)
            }
            _ => Err(AdapterError::Gatt(format!(
                "unknown characteristic {}",
                characteristic.uuid
            ))),
        }
    }

    async fn write(
        &mut self,
        characteristic: &RemoteCharacteristic,
        data: &[u8],
    ) -> Result<(), AdapterError> {
        if !self.link_alive() {
            return Err(AdapterError::NotConnected);
        }
        let service = self
            .remote_service()
            .filter(|s| s.characteristic_uuid == characteristic.uuid)
            .ok_or_else(|| AdapterError::Gatt("unknown characteristic".to_string()))?;
        if !service.accepts_write(data) {
            return Err(AdapterError::Gatt(format!(
                "write of {} bytes rejected",
                data.len()
            )));
        }

        let mut state = self.air.state.lock();
        match self.link {
            RemoteEnd::Device { .. } => {
                if let Some(device) = state.devices.get_mut(&self.remote) {
                    device.peer_writes.push(data.to_vec());
                }
            }
            RemoteEnd::Beacon => {
                state
                    .beacon_writes
                    .entry(self.remote.clone())
                    .or_default()
                    .push(data.to_vec());
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.open = false;
        let mut state = self.air.state.lock();
        if let Some(local) = state.devices.get_mut(&self.local) {
            local.stats.outbound_disconnects += 1;
        }
        if let RemoteEnd::Device { link_id } = self.link {
            if let Some(remote) = state.devices.get_mut(&self.remote) {
                remote.inbound.retain(|l| l.id != link_id);
            }
        }
        Ok(())
    }
}
