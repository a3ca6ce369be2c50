// Host Bluetooth adapter via btleplug
//
// btleplug drives the host stack in the central role only: it scans,
// connects and talks GATT, but cannot advertise or host a service. The
// server-side calls therefore report `Unsupported`, and the scheduler skips
// the server phase on this adapter.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use simmel_core::transport::ble::{
    CharacteristicProperties, GattServiceDef, RemoteCharacteristic, RemoteService, ServiceUuid,
};
use simmel_core::transport::ble::payload::{AD_TYPE_MANUFACTURER, AD_TYPE_TX_POWER, AD_TYPE_UUID128_LIST};
use simmel_core::{
    AdapterError, AdvertisingParams, BleAdapter, BleConnection, PeerAddress, ScanEntry, ScanParams,
};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

const NULL_ADDRESS: &str = "00:00:00:00:00:00";

fn platform_error(e: btleplug::Error) -> AdapterError {
    AdapterError::Platform(e.to_string())
}

/// Rebuild raw AD records from the fields a host stack reports
///
/// Host stacks hand out parsed advertisement fields rather than the raw
/// packet. The record layout used for the scanner's filters is restored here:
/// the 128-bit service list, tx power and one manufacturer record per
/// company id, company id little-endian first.
pub fn advertisement_bytes(
    services: &[Uuid],
    tx_power: Option<i16>,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Vec<u8> {
    let mut out = Vec::new();
    for uuid in services {
        let ota = ServiceUuid::from_uuid(uuid);
        out.push(17);
        out.push(AD_TYPE_UUID128_LIST);
        out.extend_from_slice(ota.as_bytes());
    }
    if let Some(power) = tx_power {
        out.extend_from_slice(&[2, AD_TYPE_TX_POWER, power as i8 as u8]);
    }
    let sorted: BTreeMap<&u16, &Vec<u8>> = manufacturer_data.iter().collect();
    for (company, data) in sorted {
        // Record length is a single byte.
        if data.len() > 252 {
            continue;
        }
        out.push((3 + data.len()) as u8);
        out.push(AD_TYPE_MANUFACTURER);
        out.extend_from_slice(&company.to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// First adapter of the host Bluetooth stack
pub struct HostAdapter {
    adapter: Adapter,
    address: PeerAddress,
    events: AsyncMutex<Option<EventStream>>,
    known: Mutex<HashMap<PeerAddress, PeripheralId>>,
}

impl HostAdapter {
    /// Open the first Bluetooth adapter on the host
    pub async fn open() -> Result<Self, AdapterError> {
        let manager = Manager::new().await.map_err(platform_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(platform_error)?
            .into_iter()
            .next()
            .ok_or(AdapterError::NotEnabled)?;
        let info = adapter.adapter_info().await.map_err(platform_error)?;
        info!("Using Bluetooth adapter {}", info);

        Ok(Self {
            adapter,
            address: PeerAddress::new(info),
            events: AsyncMutex::new(None),
            known: Mutex::new(HashMap::new()),
        })
    }

    async fn entry_for(&self, id: &PeripheralId) -> Option<ScanEntry> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let props = peripheral.properties().await.ok()??;

        let address = props.address.to_string();
        let address = if address == NULL_ADDRESS {
            PeerAddress::new(format!("{:?}", id))
        } else {
            PeerAddress::new(address)
        };
        self.known.lock().insert(address.clone(), id.clone());

        Some(ScanEntry {
            address,
            rssi: props.rssi.unwrap_or(i16::MIN),
            advertisement: advertisement_bytes(
                &props.services,
                props.tx_power_level,
                &props.manufacturer_data,
            ),
        })
    }

    fn unsupported(what: &str) -> AdapterError {
        AdapterError::Unsupported(format!("{} (host stack is central-only)", what))
    }
}

#[async_trait]
impl BleAdapter for HostAdapter {
    fn address(&self) -> PeerAddress {
        self.address.clone()
    }

    async fn set_name(&self, _name: &str) -> Result<(), AdapterError> {
        Err(Self::unsupported("set_name"))
    }

    async fn publish_service(&self, _service: &GattServiceDef) -> Result<(), AdapterError> {
        Err(Self::unsupported("GATT server"))
    }

    async fn take_peer_writes(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    async fn start_advertising(&self, _params: &AdvertisingParams) -> Result<(), AdapterError> {
        Err(Self::unsupported("advertising"))
    }

    async fn stop_advertising(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        false
    }

    async fn start_scan(&self, params: &ScanParams) -> Result<(), AdapterError> {
        let stream = self.adapter.events().await.map_err(platform_error)?;
        *self.events.lock().await = Some(stream);
        let filter = ScanFilter {
            services: vec![params.service_uuid.to_uuid()],
        };
        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| AdapterError::ScanFailed(e.to_string()))?;
        debug!("Host scan started for {}", params.service_uuid.to_uuid());
        Ok(())
    }

    async fn next_scan_entry(&self) -> Result<Option<ScanEntry>, AdapterError> {
        let mut guard = self.events.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Ok(None);
        };

        loop {
            let event = match stream.next().now_or_never() {
                Some(Some(event)) => event,
                // Stream ended or nothing buffered
                Some(None) | None => return Ok(None),
            };
            trace!("BLE event: {:?}", event);
            let id = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                | CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };
            if let Some(entry) = self.entry_for(&id).await {
                return Ok(Some(entry));
            }
        }
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        *self.events.lock().await = None;
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| AdapterError::ScanFailed(e.to_string()))
    }

    async fn connect(
        &self,
        address: &PeerAddress,
        timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, AdapterError> {
        let id = self
            .known
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| AdapterError::ConnectionFailed(format!("unknown peer {}", address)))?;
        let peripheral = self.adapter.peripheral(&id).await.map_err(platform_error)?;

        match tokio::time::timeout(timeout, peripheral.connect()).await {
            Err(_) => return Err(AdapterError::Timeout(timeout)),
            Ok(Err(e)) => return Err(AdapterError::ConnectionFailed(e.to_string())),
            Ok(Ok(())) => {}
        }

        Ok(Box::new(HostConnection {
            peripheral,
            address: address.clone(),
        }))
    }

    fn connections(&self) -> usize {
        0
    }

    async fn disconnect_all(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Central-role link to a remote peripheral
struct HostConnection {
    peripheral: Peripheral,
    address: PeerAddress,
}

impl HostConnection {
    fn characteristic(
        &self,
        wanted: &RemoteCharacteristic,
    ) -> Result<btleplug::api::Characteristic, AdapterError> {
        let uuid = wanted.uuid.to_uuid();
        let service_uuid = wanted.service_uuid.to_uuid();
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
            .ok_or_else(|| AdapterError::Gatt(format!("characteristic {} not found", uuid)))
    }
}

#[async_trait]
impl BleConnection for HostConnection {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_services(
        &mut self,
        filter: &[ServiceUuid],
    ) -> Result<Vec<RemoteService>, AdapterError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| AdapterError::Gatt(e.to_string()))?;

        let services = self
            .peripheral
            .services()
            .into_iter()
            .map(|service| RemoteService {
                uuid: ServiceUuid::from_uuid(&service.uuid),
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| RemoteCharacteristic {
                        service_uuid: ServiceUuid::from_uuid(&c.service_uuid),
                        uuid: ServiceUuid::from_uuid(&c.uuid),
                        properties: CharacteristicProperties::from_bits(c.properties.bits()),
                    })
                    .collect(),
            })
            .filter(|service| filter.is_empty() || filter.contains(&service.uuid))
            .collect();
        Ok(services)
    }

    async fn read(
        &mut self,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Vec<u8>, AdapterError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .read(&target)
            .await
            .map_err(|e| AdapterError::Gatt(e.to_string()))
    }

    async fn write(
        &mut self,
        characteristic: &RemoteCharacteristic,
        data: &[u8],
    ) -> Result<(), AdapterError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .write(&target, data, WriteType::WithResponse)
            .await
            .map_err(|e| AdapterError::Gatt(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))
    }
}
