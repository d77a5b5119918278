//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without BLE hardware. Each
//! request is recorded and answered through the event channel the same way a
//! radio would answer it, so the manager under test sees realistic event
//! sequences.
//!
//! # Features
//!
//! - **Scripted boards**: channel tables and values per peripheral, with
//!   React and Sense presets
//! - **Auto-confirmation**: connect, notify, write and read requests are
//!   answered automatically; each can be switched off to simulate a stall
//! - **Failure injection**: power loss, unexpected disconnects and arbitrary
//!   events
//! - **Request log**: every call is recorded for assertions
//!
//! Channel operations do not check that the peripheral is connected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use thunderboard_types::{
    Channel, ChannelProperties, PowerState, RESPONSE_OPCODE, RESPONSE_SUCCESS, uuids,
};

use crate::error::{Error, Result};
use crate::transport::{
    PeripheralId, Transport, TransportEvent, TransportEventReceiver, TransportEventSender,
};

/// A scripted board.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub channels: Vec<Channel>,
    pub values: HashMap<Uuid, Vec<u8>>,
}

impl MockPeripheral {
    /// A board with no channels.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: PeripheralId::new(id),
            name: None,
            rssi: Some(-55),
            channels: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the advertised RSSI.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add a channel to `service`.
    #[must_use]
    pub fn channel(mut self, service: Uuid, uuid: Uuid, properties: ChannelProperties) -> Self {
        self.channels.push(Channel::new(uuid, service, properties));
        self
    }

    /// Set the value returned by reads of `uuid`.
    #[must_use]
    pub fn value(mut self, uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(uuid, value.into());
        self
    }

    /// Remove every channel with `uuid`.
    #[must_use]
    pub fn without_channel(mut self, uuid: Uuid) -> Self {
        self.channels.retain(|c| c.uuid != uuid);
        self
    }

    fn with_identity(self, model: &str, board_id: u64) -> Self {
        self.channel(uuids::DEVICE_INFO_SERVICE, uuids::MODEL_NUMBER, ChannelProperties::readable())
            .channel(uuids::DEVICE_INFO_SERVICE, uuids::FIRMWARE_REVISION, ChannelProperties::readable())
            .channel(uuids::DEVICE_INFO_SERVICE, uuids::SYSTEM_IDENTIFIER, ChannelProperties::readable())
            .channel(uuids::BATTERY_SERVICE, uuids::BATTERY_LEVEL, ChannelProperties::notifiable())
            .value(uuids::MODEL_NUMBER, model.as_bytes())
            .value(uuids::FIRMWARE_REVISION, &b"2.0.3"[..])
            .value(uuids::SYSTEM_IDENTIFIER, board_id.to_le_bytes())
            .value(uuids::BATTERY_LEVEL, [87u8])
    }

    fn with_motion(self) -> Self {
        let service = uuids::ACCELERATION_ORIENTATION_SERVICE;
        self.channel(service, uuids::ACCELERATION_MEASUREMENT, ChannelProperties::notifiable())
            .channel(service, uuids::ORIENTATION_MEASUREMENT, ChannelProperties::notifiable())
            .channel(service, uuids::COMMAND, ChannelProperties::control_point())
    }

    fn with_environment(self) -> Self {
        let service = uuids::ENVIRONMENTAL_SENSING_SERVICE;
        self.channel(service, uuids::TEMPERATURE, ChannelProperties::readable())
            .channel(service, uuids::HUMIDITY, ChannelProperties::readable())
            .channel(service, uuids::UV_INDEX, ChannelProperties::readable())
            .value(uuids::TEMPERATURE, 2215i16.to_le_bytes())
            .value(uuids::HUMIDITY, 4530u16.to_le_bytes())
            .value(uuids::UV_INDEX, [3u8])
    }

    fn with_digital_io(self) -> Self {
        let service = uuids::AUTOMATION_IO_SERVICE;
        self.channel(service, uuids::DIGITAL, ChannelProperties::notifiable())
            .channel(service, uuids::DIGITAL, ChannelProperties::writable())
            .value(uuids::DIGITAL, [0u8])
    }

    /// A Thunderboard React: buttons and LEDs, motion with wheel
    /// revolutions, temperature, humidity and UV.
    pub fn thunderboard_react(id: impl Into<String>) -> Self {
        Self::new(id)
            .name("Thunder React #47911")
            .with_identity("RD-0057", 0x00AB_CDEF_0000_BB27)
            .with_digital_io()
            .with_motion()
            .channel(uuids::CSC_SERVICE, uuids::CSC_MEASUREMENT, ChannelProperties::notifiable())
            .channel(uuids::CSC_SERVICE, uuids::CSC_CONTROL_POINT, ChannelProperties::control_point())
            .with_environment()
    }

    /// A Thunderboard Sense on USB power: the full environmental sensor set
    /// including air quality and the hall effect sensor, RGB LEDs, motion
    /// without revolutions.
    pub fn thunderboard_sense(id: impl Into<String>) -> Self {
        let env = uuids::ENVIRONMENTAL_SENSING_SERVICE;
        Self::new(id)
            .name("Thunder Sense #09621")
            .with_identity("BRD4166A", 0x0000_0000_0000_2595)
            .channel(uuids::POWER_MANAGEMENT_SERVICE, uuids::POWER_SOURCE, ChannelProperties::readable())
            .value(uuids::POWER_SOURCE, [1u8])
            .with_digital_io()
            .channel(uuids::USER_INTERFACE_SERVICE, uuids::RGB_LEDS, ChannelProperties::writable())
            .with_motion()
            .with_environment()
            .channel(env, uuids::AIR_PRESSURE, ChannelProperties::readable())
            .channel(env, uuids::SOUND_LEVEL, ChannelProperties::readable())
            .channel(uuids::AMBIENT_LIGHT_SERVICE, uuids::AMBIENT_LIGHT, ChannelProperties::readable())
            .channel(uuids::INDOOR_AIR_QUALITY_SERVICE, uuids::AIR_QUALITY_CO2, ChannelProperties::readable())
            .channel(uuids::INDOOR_AIR_QUALITY_SERVICE, uuids::AIR_QUALITY_VOC, ChannelProperties::readable())
            .channel(uuids::HALL_EFFECT_SERVICE, uuids::HALL_STATE, ChannelProperties::notifiable())
            .channel(uuids::HALL_EFFECT_SERVICE, uuids::HALL_FIELD_STRENGTH, ChannelProperties::notifiable())
            .value(uuids::AIR_PRESSURE, 1_013_250u32.to_le_bytes())
            .value(uuids::SOUND_LEVEL, 4210i16.to_le_bytes())
            .value(uuids::AMBIENT_LIGHT, 35_000u32.to_le_bytes())
            .value(uuids::AIR_QUALITY_CO2, 612u16.to_le_bytes())
            .value(uuids::AIR_QUALITY_VOC, 48u16.to_le_bytes())
            .value(uuids::HALL_STATE, [0u8])
            .value(uuids::HALL_FIELD_STRENGTH, 12i32.to_le_bytes())
    }

    /// Switch the Sense preset to coin-cell power.
    #[must_use]
    pub fn on_coin_cell(self) -> Self {
        self.value(uuids::POWER_SOURCE, [4u8])
    }

    fn services(&self) -> Vec<Uuid> {
        let mut services = Vec::new();
        for channel in &self.channels {
            if !services.contains(&channel.service) {
                services.push(channel.service);
            }
        }
        services
    }

    fn find(&self, uuid: Uuid, pick: impl Fn(&ChannelProperties) -> bool) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.uuid == uuid && pick(&c.properties))
    }
}

/// A request received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    Disconnect(PeripheralId),
    DisconnectAll,
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics { id: PeripheralId, service: Uuid },
    Read { id: PeripheralId, uuid: Uuid },
    Write { id: PeripheralId, uuid: Uuid, value: Vec<u8> },
    SetNotify { id: PeripheralId, uuid: Uuid, enabled: bool },
}

#[derive(Debug)]
struct MockInner {
    sender: TransportEventSender,
    receiver: Mutex<Option<TransportEventReceiver>>,
    power: RwLock<PowerState>,
    peripherals: RwLock<HashMap<PeripheralId, MockPeripheral>>,
    connected: RwLock<HashSet<PeripheralId>>,
    notifying: RwLock<HashMap<PeripheralId, BTreeSet<Uuid>>>,
    held_notifies: RwLock<Vec<(PeripheralId, Uuid, bool)>>,
    requests: RwLock<Vec<MockRequest>>,
    auto_connect: AtomicBool,
    auto_notify: AtomicBool,
    auto_write: AtomicBool,
    auto_read: AtomicBool,
    command_responses: AtomicBool,
}

/// A deterministic in-memory [`Transport`].
///
/// # Example
///
/// ```
/// use thunderboard_core::mock::{MockPeripheral, MockTransport};
/// use thunderboard_core::{PeripheralId, Transport, TransportEvent};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.add_peripheral(MockPeripheral::thunderboard_react("react-1")).await;
///     let mut events = transport.take_events().await.unwrap();
///
///     transport.connect(&PeripheralId::new("react-1")).await.unwrap();
///     assert!(matches!(events.recv().await, Some(TransportEvent::Connected { .. })));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A powered-on transport with no peripherals that answers everything.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                sender,
                receiver: Mutex::new(Some(receiver)),
                power: RwLock::new(PowerState::Enabled),
                peripherals: RwLock::new(HashMap::new()),
                connected: RwLock::new(HashSet::new()),
                notifying: RwLock::new(HashMap::new()),
                held_notifies: RwLock::new(Vec::new()),
                requests: RwLock::new(Vec::new()),
                auto_connect: AtomicBool::new(true),
                auto_notify: AtomicBool::new(true),
                auto_write: AtomicBool::new(true),
                auto_read: AtomicBool::new(true),
                command_responses: AtomicBool::new(true),
            }),
        }
    }

    pub async fn add_peripheral(&self, peripheral: MockPeripheral) {
        self.inner
            .peripherals
            .write()
            .await
            .insert(peripheral.id.clone(), peripheral);
    }

    /// Answer connect requests. When off, connects never complete.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.inner.auto_connect.store(enabled, Ordering::Relaxed);
    }

    /// Confirm set-notify requests. When off, requests are held until
    /// [`MockTransport::release_notifies`].
    pub fn set_auto_notify(&self, enabled: bool) {
        self.inner.auto_notify.store(enabled, Ordering::Relaxed);
    }

    /// Confirm writes.
    pub fn set_auto_write(&self, enabled: bool) {
        self.inner.auto_write.store(enabled, Ordering::Relaxed);
    }

    /// Answer reads.
    pub fn set_auto_read(&self, enabled: bool) {
        self.inner.auto_read.store(enabled, Ordering::Relaxed);
    }

    /// Answer control point writes with a success indication.
    pub fn set_command_responses(&self, enabled: bool) {
        self.inner.command_responses.store(enabled, Ordering::Relaxed);
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<MockRequest> {
        self.inner.requests.read().await.clone()
    }

    pub async fn clear_requests(&self) {
        self.inner.requests.write().await.clear();
    }

    /// Channels currently notifying on `id`.
    pub async fn notifying(&self, id: &PeripheralId) -> BTreeSet<Uuid> {
        self.inner
            .notifying
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, id: &PeripheralId) -> bool {
        self.inner.connected.read().await.contains(id)
    }

    /// Change the radio power state. Powering off drops every link silently.
    pub async fn set_power(&self, state: PowerState) {
        *self.inner.power.write().await = state;
        if state == PowerState::Disabled {
            self.inner.connected.write().await.clear();
            self.inner.notifying.write().await.clear();
        }
        self.emit(TransportEvent::PowerStateChanged(state));
    }

    /// Drop the link to `id` as if the board went out of range.
    pub async fn simulate_disconnect(&self, id: &PeripheralId) {
        self.inner.connected.write().await.remove(id);
        self.inner.notifying.write().await.remove(id);
        self.emit(TransportEvent::Disconnected {
            id: id.clone(),
            expected: false,
        });
    }

    /// Push a notification.
    pub fn notify_value(&self, id: &PeripheralId, uuid: Uuid, value: impl Into<Vec<u8>>) {
        self.emit(TransportEvent::ValueUpdated {
            id: id.clone(),
            uuid,
            value: value.into(),
        });
    }

    /// Change the value later reads of `uuid` return.
    pub async fn set_value(&self, id: &PeripheralId, uuid: Uuid, value: impl Into<Vec<u8>>) {
        if let Some(peripheral) = self.inner.peripherals.write().await.get_mut(id) {
            peripheral.values.insert(uuid, value.into());
        }
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, event: TransportEvent) {
        // The receiver may be gone once the manager stopped.
        let _ = self.inner.sender.send(event);
    }

    /// Confirm every held set-notify request. Returns how many were released.
    pub async fn release_notifies(&self) -> usize {
        let held = std::mem::take(&mut *self.inner.held_notifies.write().await);
        let count = held.len();
        for (id, uuid, enabled) in held {
            self.confirm_notify(id, uuid, enabled).await;
        }
        count
    }

    /// Number of set-notify requests waiting for [`MockTransport::release_notifies`].
    pub async fn held_notify_count(&self) -> usize {
        self.inner.held_notifies.read().await.len()
    }

    async fn record(&self, request: MockRequest) {
        self.inner.requests.write().await.push(request);
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<MockPeripheral> {
        self.inner
            .peripherals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::device_not_found(id.as_str()))
    }

    async fn confirm_notify(&self, id: PeripheralId, uuid: Uuid, enabled: bool) {
        {
            let mut notifying = self.inner.notifying.write().await;
            let set = notifying.entry(id.clone()).or_default();
            if enabled {
                set.insert(uuid);
            } else {
                set.remove(&uuid);
            }
        }
        self.emit(TransportEvent::NotifyStateChanged {
            id,
            uuid,
            enabled,
            error: None,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn take_events(&self) -> Option<TransportEventReceiver> {
        self.inner.receiver.lock().await.take()
    }

    async fn power_state(&self) -> PowerState {
        *self.inner.power.read().await
    }

    async fn start_scan(&self) -> Result<()> {
        self.record(MockRequest::StartScan).await;
        if self.power_state().await != PowerState::Enabled {
            return Err(Error::PoweredOff);
        }
        for peripheral in self.inner.peripherals.read().await.values() {
            self.emit(TransportEvent::Discovered {
                id: peripheral.id.clone(),
                name: peripheral.name.clone(),
                rssi: peripheral.rssi,
            });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockRequest::StopScan).await;
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<()> {
        self.record(MockRequest::Connect(id.clone())).await;
        if self.power_state().await != PowerState::Enabled {
            return Err(Error::PoweredOff);
        }
        if self.peripheral(id).await.is_err() {
            self.emit(TransportEvent::ConnectFailed {
                id: id.clone(),
                reason: "unknown peripheral".to_string(),
            });
            return Ok(());
        }
        if self.inner.auto_connect.load(Ordering::Relaxed) {
            self.inner.connected.write().await.insert(id.clone());
            self.emit(TransportEvent::Connected { id: id.clone() });
        }
        Ok(())
    }

    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()> {
        self.record(MockRequest::CancelConnection(id.clone())).await;
        self.inner.connected.write().await.remove(id);
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<()> {
        self.record(MockRequest::Disconnect(id.clone())).await;
        if self.inner.connected.write().await.remove(id) {
            self.inner.notifying.write().await.remove(id);
            self.emit(TransportEvent::Disconnected {
                id: id.clone(),
                expected: true,
            });
        }
        Ok(())
    }

    async fn disconnect_all(&self) -> Result<()> {
        self.record(MockRequest::DisconnectAll).await;
        let ids: Vec<PeripheralId> = self.inner.connected.write().await.drain().collect();
        let mut notifying = self.inner.notifying.write().await;
        for id in ids {
            notifying.remove(&id);
            self.emit(TransportEvent::Disconnected { id, expected: true });
        }
        Ok(())
    }

    async fn discover_services(&self, id: &PeripheralId) -> Result<()> {
        self.record(MockRequest::DiscoverServices(id.clone())).await;
        let peripheral = self.peripheral(id).await?;
        self.emit(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services: peripheral.services(),
        });
        Ok(())
    }

    async fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) -> Result<()> {
        self.record(MockRequest::DiscoverCharacteristics {
            id: id.clone(),
            service,
        })
        .await;
        let peripheral = self.peripheral(id).await?;
        let channels = peripheral
            .channels
            .into_iter()
            .filter(|c| c.service == service)
            .collect();
        self.emit(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            channels,
        });
        Ok(())
    }

    async fn read_value(&self, id: &PeripheralId, uuid: Uuid) -> Result<()> {
        self.record(MockRequest::Read {
            id: id.clone(),
            uuid,
        })
        .await;
        if !self.inner.auto_read.load(Ordering::Relaxed) {
            return Ok(());
        }
        let value = self
            .inner
            .peripherals
            .read()
            .await
            .get(id)
            .and_then(|p| p.values.get(&uuid).cloned());
        match value {
            Some(value) => self.emit(TransportEvent::ValueUpdated {
                id: id.clone(),
                uuid,
                value,
            }),
            None => self.emit(TransportEvent::ReadFailed {
                id: id.clone(),
                uuid,
                error: "no value".to_string(),
            }),
        }
        Ok(())
    }

    async fn write_value(&self, id: &PeripheralId, uuid: Uuid, value: &[u8]) -> Result<()> {
        self.record(MockRequest::Write {
            id: id.clone(),
            uuid,
            value: value.to_vec(),
        })
        .await;
        if self.inner.auto_write.load(Ordering::Relaxed) {
            self.emit(TransportEvent::WriteConfirmed {
                id: id.clone(),
                uuid,
                error: None,
            });
        }
        let is_control_point = uuid == uuids::COMMAND || uuid == uuids::CSC_CONTROL_POINT;
        if is_control_point && self.inner.command_responses.load(Ordering::Relaxed) {
            let request = value.first().copied().unwrap_or_default();
            self.emit(TransportEvent::ValueUpdated {
                id: id.clone(),
                uuid,
                value: vec![RESPONSE_OPCODE, request, RESPONSE_SUCCESS],
            });
        }
        Ok(())
    }

    async fn set_notify(&self, id: &PeripheralId, uuid: Uuid, enabled: bool) -> Result<()> {
        self.record(MockRequest::SetNotify {
            id: id.clone(),
            uuid,
            enabled,
        })
        .await;
        let peripheral = self.peripheral(id).await?;
        if peripheral
            .find(uuid, ChannelProperties::supports_notify)
            .is_none()
        {
            self.emit(TransportEvent::NotifyStateChanged {
                id: id.clone(),
                uuid,
                enabled: false,
                error: Some("channel does not support notifications".to_string()),
            });
            return Ok(());
        }
        if self.inner.auto_notify.load(Ordering::Relaxed) {
            self.confirm_notify(id.clone(), uuid, enabled).await;
        } else {
            self.inner
                .held_notifies
                .write()
                .await
                .push((id.clone(), uuid, enabled));
        }
        Ok(())
    }
}
