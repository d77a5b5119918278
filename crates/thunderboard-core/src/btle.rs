//! [`Transport`] implementation on top of btleplug.
//!
//! Every request spawns a task that performs the btleplug call and reports
//! the outcome as a [`TransportEvent`]. Adapter events become discovery and
//! disconnect events, a notification pump per connected peripheral emits
//! value updates, and the adapter state is polled for power changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use thunderboard_types::{Channel, ChannelProperties, PowerState};

use crate::device::ConnectionConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::transport::{
    PeripheralId, Transport, TransportEvent, TransportEventReceiver, TransportEventSender,
};
use crate::util::format_peripheral_id;

/// Advertised names of Thunderboards start with this.
const NAME_PREFIX: &str = "Thunder";

/// Adapter state poll interval.
const POWER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout for service discovery after connecting.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::connection_failed(None, ConnectionFailureReason::AdapterUnavailable))
}

fn power_from(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::Enabled,
        CentralState::PoweredOff => PowerState::Disabled,
        _ => PowerState::Unknown,
    }
}

fn properties_from(flags: CharPropFlags) -> ChannelProperties {
    ChannelProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

/// Connected peripherals and their notification pumps.
///
/// A peripheral stays here for as long as its link is up, even when its
/// notification stream could not be opened, so a later disconnect is
/// always reported.
#[derive(Default)]
struct Links(HashMap<PeripheralId, Option<JoinHandle<()>>>);

impl Links {
    fn insert(&mut self, id: PeripheralId, pump: Option<JoinHandle<()>>) {
        if let Some(Some(previous)) = self.0.insert(id, pump) {
            previous.abort();
        }
    }

    /// Forget `id` and stop its pump. Returns false if it was not linked.
    fn remove(&mut self, id: &PeripheralId) -> bool {
        match self.0.remove(id) {
            Some(pump) => {
                if let Some(pump) = pump {
                    pump.abort();
                }
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for pump in self.0.drain().filter_map(|(_, pump)| pump) {
            pump.abort();
        }
    }

    fn ids(&self) -> Vec<PeripheralId> {
        self.0.keys().cloned().collect()
    }
}

struct Inner {
    adapter: Adapter,
    events: TransportEventSender,
    receiver: Mutex<Option<TransportEventReceiver>>,
    peripherals: RwLock<HashMap<PeripheralId, Peripheral>>,
    characteristics: RwLock<HashMap<PeripheralId, Vec<Characteristic>>>,
    connecting: Mutex<HashMap<PeripheralId, JoinHandle<()>>>,
    links: Mutex<Links>,
    /// Peripherals whose disconnect was requested.
    expected: Mutex<HashSet<PeripheralId>>,
    power: RwLock<PowerState>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        // The receiver is gone only when the manager was dropped.
        let _ = self.events.send(event);
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.read().await.get(id) {
            return Ok(peripheral.clone());
        }
        for peripheral in self.adapter.peripherals().await? {
            if format_peripheral_id(&peripheral.id()) == id.as_str() {
                self.peripherals
                    .write()
                    .await
                    .insert(id.clone(), peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(Error::device_not_found(id.as_str()))
    }

    async fn characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        pick: impl Fn(CharPropFlags) -> bool,
    ) -> Result<Characteristic> {
        self.characteristics
            .read()
            .await
            .get(id)
            .and_then(|chars| {
                chars
                    .iter()
                    .find(|c| c.uuid == uuid && pick(c.properties))
                    .cloned()
            })
            .ok_or_else(|| Error::channel_not_found(uuid))
    }

    /// Forget a link and report it. Returns false if it was already gone.
    async fn link_lost(&self, id: &PeripheralId) -> bool {
        if !self.links.lock().await.remove(id) {
            return false;
        }
        self.characteristics.write().await.remove(id);
        let expected = self.expected.lock().await.remove(id);
        self.emit(TransportEvent::Disconnected {
            id: id.clone(),
            expected,
        });
        true
    }

    async fn start_notification_pump(self: &Arc<Self>, id: PeripheralId, peripheral: Peripheral) {
        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(device = %id, error = %e, "failed to open notification stream");
                self.links.lock().await.insert(id, None);
                return;
            }
        };
        let inner = Arc::clone(self);
        let pump_id = id.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                inner.emit(TransportEvent::ValueUpdated {
                    id: pump_id.clone(),
                    uuid: notification.uuid,
                    value: notification.value,
                });
            }
            debug!(device = %pump_id, "notification stream ended");
        });
        self.links.lock().await.insert(id, Some(handle));
    }

    async fn on_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(pid) | CentralEvent::DeviceUpdated(pid) => {
                let Ok(peripheral) = self.adapter.peripheral(&pid).await else {
                    return;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    return;
                };
                let Some(name) = properties.local_name else {
                    return;
                };
                if !name.starts_with(NAME_PREFIX) {
                    return;
                }
                let id = PeripheralId::new(format_peripheral_id(&pid));
                self.peripherals
                    .write()
                    .await
                    .insert(id.clone(), peripheral);
                self.emit(TransportEvent::Discovered {
                    id,
                    name: Some(name),
                    rssi: properties.rssi,
                });
            }
            CentralEvent::DeviceDisconnected(pid) => {
                let id = PeripheralId::new(format_peripheral_id(&pid));
                if self.link_lost(&id).await {
                    debug!(device = %id, "adapter reported disconnect");
                }
            }
            _ => {}
        }
    }

    async fn set_power(&self, state: PowerState) {
        let previous = std::mem::replace(&mut *self.power.write().await, state);
        if previous == state {
            return;
        }
        if state == PowerState::Disabled {
            // The stack drops every link silently; the manager tears them down.
            self.links.lock().await.clear();
            for (_, attempt) in self.connecting.lock().await.drain() {
                attempt.abort();
            }
            self.characteristics.write().await.clear();
            self.expected.lock().await.clear();
        }
        self.emit(TransportEvent::PowerStateChanged(state));
    }
}

/// BLE central backed by the host's first Bluetooth adapter.
pub struct BtleTransport {
    inner: Arc<Inner>,
    watchers: Vec<JoinHandle<()>>,
}

impl BtleTransport {
    /// Open the first adapter with default timeouts.
    pub async fn new() -> Result<Self> {
        Self::with_config(&ConnectionConfig::default()).await
    }

    /// Open the first adapter using the read and write timeouts of `config`.
    pub async fn with_config(config: &ConnectionConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        let power = adapter
            .adapter_state()
            .await
            .map(power_from)
            .unwrap_or(PowerState::Unknown);
        let mut central_events = adapter.events().await?;
        info!(?power, "Bluetooth adapter opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            adapter,
            events: tx,
            receiver: Mutex::new(Some(rx)),
            peripherals: RwLock::new(HashMap::new()),
            characteristics: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            links: Mutex::new(Links::default()),
            expected: Mutex::new(HashSet::new()),
            power: RwLock::new(power),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        });

        let central = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                while let Some(event) = central_events.next().await {
                    inner.on_central_event(event).await;
                }
                debug!("adapter event stream ended");
            })
        };
        let power_watch = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(POWER_POLL_INTERVAL);
                loop {
                    interval.tick().await;
                    match inner.adapter.adapter_state().await {
                        Ok(state) => inner.set_power(power_from(state)).await,
                        Err(e) => debug!(error = %e, "adapter state unavailable"),
                    }
                }
            })
        };

        Ok(Self {
            inner,
            watchers: vec![central, power_watch],
        })
    }

    fn spawn<F>(&self, work: impl FnOnce(Arc<Inner>) -> F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(work(Arc::clone(&self.inner)))
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn take_events(&self) -> Option<TransportEventReceiver> {
        self.inner.receiver.lock().await.take()
    }

    async fn power_state(&self) -> PowerState {
        *self.inner.power.read().await
    }

    async fn start_scan(&self) -> Result<()> {
        if self.power_state().await == PowerState::Disabled {
            return Err(Error::PoweredOff);
        }
        self.inner.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        let id = id.clone();
        let attempt = self.spawn({
            let id = id.clone();
            move |inner| async move {
                match peripheral.connect().await {
                    Ok(()) => {
                        inner.connecting.lock().await.remove(&id);
                        inner.start_notification_pump(id.clone(), peripheral).await;
                        inner.emit(TransportEvent::Connected { id });
                    }
                    Err(e) => {
                        inner.connecting.lock().await.remove(&id);
                        inner.emit(TransportEvent::ConnectFailed {
                            id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        });
        if let Some(previous) = self.inner.connecting.lock().await.insert(id, attempt) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()> {
        if let Some(attempt) = self.inner.connecting.lock().await.remove(id) {
            attempt.abort();
        }
        let peripheral = self.inner.peripheral(id).await?;
        if let Err(e) = peripheral.disconnect().await {
            debug!(device = %id, error = %e, "cancel found no link");
        }
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        self.inner.expected.lock().await.insert(id.clone());
        let id = id.clone();
        self.spawn(move |inner| async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!(device = %id, error = %e, "disconnect failed");
            }
            inner.link_lost(&id).await;
        });
        Ok(())
    }

    async fn disconnect_all(&self) -> Result<()> {
        let ids = self.inner.links.lock().await.ids();
        for id in ids {
            self.disconnect(&id).await?;
        }
        Ok(())
    }

    async fn discover_services(&self, id: &PeripheralId) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        let id = id.clone();
        self.spawn(move |inner| async move {
            match timeout(DISCOVERY_TIMEOUT, peripheral.discover_services()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(device = %id, error = %e, "service discovery failed"),
                Err(_) => warn!(device = %id, "service discovery timed out"),
            }
            let services = peripheral.services();
            let characteristics: Vec<Characteristic> = services
                .iter()
                .flat_map(|s| s.characteristics.iter().cloned())
                .collect();
            debug!(
                device = %id,
                services = services.len(),
                characteristics = characteristics.len(),
                "services discovered"
            );
            inner
                .characteristics
                .write()
                .await
                .insert(id.clone(), characteristics);
            inner.emit(TransportEvent::ServicesDiscovered {
                id,
                services: services.iter().map(|s| s.uuid).collect(),
            });
        });
        Ok(())
    }

    async fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) -> Result<()> {
        let channels: Vec<Channel> = self
            .inner
            .characteristics
            .read()
            .await
            .get(id)
            .ok_or(Error::NotConnected)?
            .iter()
            .filter(|c| c.service_uuid == service)
            .map(|c| Channel::new(c.uuid, service, properties_from(c.properties)))
            .collect();
        self.inner.emit(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            channels,
        });
        Ok(())
    }

    async fn read_value(&self, id: &PeripheralId, uuid: Uuid) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        let characteristic = self
            .inner
            .characteristic(id, uuid, |p| p.contains(CharPropFlags::READ))
            .await?;
        let id = id.clone();
        self.spawn(move |inner| async move {
            let event = match timeout(inner.read_timeout, peripheral.read(&characteristic)).await {
                Ok(Ok(value)) => TransportEvent::ValueUpdated { id, uuid, value },
                Ok(Err(e)) => TransportEvent::ReadFailed {
                    id,
                    uuid,
                    error: e.to_string(),
                },
                Err(_) => TransportEvent::ReadFailed {
                    id,
                    uuid,
                    error: Error::timeout("read", inner.read_timeout).to_string(),
                },
            };
            inner.emit(event);
        });
        Ok(())
    }

    async fn write_value(&self, id: &PeripheralId, uuid: Uuid, value: &[u8]) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        let characteristic = self
            .inner
            .characteristic(id, uuid, |p| {
                p.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            })
            .await?;
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let id = id.clone();
        let value = value.to_vec();
        self.spawn(move |inner| async move {
            let error = match timeout(
                inner.write_timeout,
                peripheral.write(&characteristic, &value, write_type),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(Error::timeout("write", inner.write_timeout).to_string()),
            };
            inner.emit(TransportEvent::WriteConfirmed { id, uuid, error });
        });
        Ok(())
    }

    async fn set_notify(&self, id: &PeripheralId, uuid: Uuid, enabled: bool) -> Result<()> {
        let peripheral = self.inner.peripheral(id).await?;
        let characteristic = self
            .inner
            .characteristic(id, uuid, |p| {
                p.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
            })
            .await?;
        let id = id.clone();
        self.spawn(move |inner| async move {
            let result = if enabled {
                peripheral.subscribe(&characteristic).await
            } else {
                peripheral.unsubscribe(&characteristic).await
            };
            inner.emit(TransportEvent::NotifyStateChanged {
                id,
                uuid,
                enabled,
                error: result.err().map(|e| e.to_string()),
            });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_from_flags() {
        let props = properties_from(CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert!(props.read);
        assert!(props.notify);
        assert!(!props.write);
        assert!(props.supports_notify());

        let props = properties_from(CharPropFlags::WRITE | CharPropFlags::INDICATE);
        assert!(props.is_writable());
        assert!(props.indicate);
    }

    #[test]
    fn test_power_from_central_state() {
        assert_eq!(power_from(CentralState::PoweredOn), PowerState::Enabled);
        assert_eq!(power_from(CentralState::PoweredOff), PowerState::Disabled);
        assert_eq!(power_from(CentralState::Unknown), PowerState::Unknown);
    }

    #[tokio::test]
    async fn test_link_without_pump_reports_removal() {
        let mut links = Links::default();
        let id = PeripheralId::new("dev-1");

        links.insert(id.clone(), None);
        assert_eq!(links.ids(), vec![id.clone()]);
        assert!(links.remove(&id));
        assert!(!links.remove(&id));
    }

    #[tokio::test]
    async fn test_relinking_stops_previous_pump() {
        let mut links = Links::default();
        let id = PeripheralId::new("dev-1");
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        let pump = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        });

        links.insert(id.clone(), Some(pump));
        links.insert(id.clone(), None);
        assert!(stopped.await.is_err());
        assert!(links.remove(&id));
    }
}
