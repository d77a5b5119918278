//! Connection, scan and configuration lifecycle.
//!
//! [`BleManager`] owns every known board. Transport events are consumed in
//! order by a single pump task, which is the only place device state changes
//! in response to the radio. Public operations issue requests and, where the
//! caller needs the outcome, wait for the resulting events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use thunderboard_types::{ConnectionState, DemoKind, PowerState, registry};

use crate::configuration::ConfigurationPlan;
use crate::correlator::{Correlator, OperationKind};
use crate::demo::DemoConnection;
use crate::device::{ConnectionConfig, Device, DeviceSnapshot};
use crate::error::{ConnectionFailureReason, DemoLabel, Error, Result};
use crate::events::{EventDispatcher, EventReceiver, ManagerEvent};
use crate::transport::{PeripheralId, Transport, TransportEvent};

/// Default scan window for [`BleManager::scan`].
const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Configuration for the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Connection and configuration timeouts.
    pub connection: ConnectionConfig,
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Scan window used by [`BleManager::scan`].
    pub scan_duration: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            event_capacity: 100,
            scan_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be non-zero"));
        }
        if self.scan_duration.is_zero() {
            return Err(Error::invalid_config("scan_duration must be non-zero"));
        }
        Ok(())
    }
}

/// State shared between the manager, its pump, its timers and running
/// configuration graphs.
pub(crate) struct Shared {
    pub transport: Arc<dyn Transport>,
    pub devices: RwLock<HashMap<PeripheralId, Device>>,
    pub correlator: Arc<Correlator>,
    pub events: EventDispatcher,
    pub config: ManagerConfig,
    /// Signalled whenever a device's channel list changes or it disconnects.
    pub channels_changed: Notify,
    pending_connection: Mutex<Option<(PeripheralId, JoinHandle<()>)>>,
    power: RwLock<PowerState>,
    scanning: AtomicBool,
}

impl Shared {
    /// Apply one transport event.
    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PowerStateChanged(state) => self.on_power_state(state).await,
            TransportEvent::Discovered { id, name, rssi } => {
                self.on_discovered(id, name, rssi).await
            }
            TransportEvent::Connected { id } => self.on_connected(id).await,
            TransportEvent::ConnectFailed { id, reason } => {
                self.on_connect_failed(id, reason).await
            }
            TransportEvent::Disconnected { id, expected } => {
                self.take_pending(&id).await;
                self.tear_down(&id, !expected).await;
            }
            TransportEvent::ServicesDiscovered { id, services } => {
                if !self.is_connected(&id).await {
                    return;
                }
                debug!(device = %id, services = services.len(), "services discovered");
                for service in services {
                    if let Err(e) = self.transport.discover_characteristics(&id, service).await {
                        warn!(device = %id, %service, error = %e, "characteristic discovery failed");
                    }
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                channels,
            } => self.on_characteristics(id, service, channels).await,
            TransportEvent::ValueUpdated { id, uuid, value } => {
                let (changed, sessions) = {
                    let mut devices = self.devices.write().await;
                    let Some(device) = devices.get_mut(&id) else {
                        return;
                    };
                    if device.state != ConnectionState::Connected {
                        return;
                    }
                    (device.apply_value(uuid, &value), device.sessions.clone())
                };
                if changed {
                    self.events.send(ManagerEvent::DeviceUpdated { device: id });
                }
                for session in sessions {
                    session.on_value(uuid, &value);
                }
            }
            TransportEvent::ReadFailed { id, uuid, error } => {
                let error = Error::ReadFailed {
                    uuid: uuid.to_string(),
                    reason: error,
                };
                debug!(device = %id, error = %error, "read failed");
                let sessions = match self.devices.read().await.get(&id) {
                    Some(device) => device.sessions.clone(),
                    None => return,
                };
                for session in sessions {
                    session.on_read_failed(uuid, &error);
                }
            }
            TransportEvent::NotifyStateChanged {
                id,
                uuid,
                enabled,
                error,
            } => {
                if error.is_none() {
                    if let Some(device) = self.devices.write().await.get_mut(&id) {
                        if enabled {
                            device.notifying.insert(uuid);
                        } else {
                            device.notifying.remove(&uuid);
                        }
                    }
                }
                let outcome = match error {
                    None => Ok(()),
                    Some(reason) => Err(Error::NotifyFailed {
                        uuid: uuid.to_string(),
                        reason,
                    }),
                };
                self.correlator
                    .resolve(&id, uuid, OperationKind::Notify, outcome)
                    .await;
            }
            TransportEvent::WriteConfirmed { id, uuid, error } => {
                let failed = error.clone();
                let outcome = match error {
                    None => Ok(()),
                    Some(reason) => Err(Error::WriteFailed {
                        uuid: uuid.to_string(),
                        reason,
                    }),
                };
                let resolved = self
                    .correlator
                    .resolve(&id, uuid, OperationKind::Write, outcome)
                    .await;
                if let (false, Some(reason)) = (resolved, failed) {
                    warn!(device = %id, channel = %uuid, reason = %reason, "write failed");
                }
            }
        }
    }

    async fn on_power_state(&self, state: PowerState) {
        let previous = std::mem::replace(&mut *self.power.write().await, state);
        if previous == state {
            return;
        }
        info!(?state, "radio power state changed");

        if state == PowerState::Disabled {
            if self.scanning.swap(false, Ordering::AcqRel) {
                if let Err(e) = self.transport.stop_scan().await {
                    debug!(error = %e, "stop scan after power off failed");
                }
                self.events.send(ManagerEvent::ScanStopped);
            }
            let pending = self.pending_connection.lock().await.take();
            if let Some((id, timer)) = pending {
                timer.abort();
                if let Some(device) = self.devices.write().await.get_mut(&id) {
                    device.state = ConnectionState::Disconnected;
                }
                if let Err(e) = self.transport.cancel_connection(&id).await {
                    debug!(device = %id, error = %e, "cancel connection after power off failed");
                }
                warn!(device = %id, "connection abandoned, radio powered off");
                self.events.send(ManagerEvent::ConnectionFailed {
                    device: id,
                    reason: "radio powered off".to_string(),
                });
            }
            let connected: Vec<PeripheralId> = self
                .devices
                .read()
                .await
                .values()
                .filter(|d| d.state == ConnectionState::Connected)
                .map(|d| d.id.clone())
                .collect();
            for id in connected {
                self.tear_down(&id, true).await;
            }
        }
        self.events.send(ManagerEvent::PowerStateChanged { state });
    }

    async fn on_discovered(&self, id: PeripheralId, name: Option<String>, rssi: Option<i16>) {
        let event = {
            let mut devices = self.devices.write().await;
            match devices.get_mut(&id) {
                None => {
                    let mut device = Device::new(id.clone());
                    device.name = name.clone();
                    device.rssi = rssi;
                    devices.insert(id.clone(), device);
                    ManagerEvent::DeviceDiscovered {
                        device: id,
                        name,
                        rssi,
                    }
                }
                Some(device) => {
                    let renamed = name.is_some() && name != device.name;
                    if renamed {
                        device.name = name;
                    }
                    if !renamed && rssi == device.rssi {
                        return;
                    }
                    if rssi.is_some() {
                        device.rssi = rssi;
                    }
                    ManagerEvent::DeviceUpdated { device: id }
                }
            }
        };
        self.events.send(event);
    }

    async fn on_connected(&self, id: PeripheralId) {
        let was_pending = self.take_pending(&id).await;
        let epoch = {
            let mut devices = self.devices.write().await;
            match devices.get_mut(&id) {
                Some(device) if was_pending && device.state == ConnectionState::Connecting => {
                    Some(device.begin_epoch())
                }
                _ => None,
            }
        };

        let Some(epoch) = epoch else {
            // Timed out or cancelled before the radio answered.
            debug!(device = %id, "dropping late connection");
            if let Err(e) = self.transport.disconnect(&id).await {
                warn!(device = %id, error = %e, "failed to drop late connection");
            }
            return;
        };

        info!(device = %id, epoch, "connected");
        self.events.send(ManagerEvent::DeviceConnected {
            device: id.clone(),
            epoch,
        });
        if let Err(e) = self.transport.discover_services(&id).await {
            warn!(device = %id, error = %e, "service discovery failed");
        }
    }

    async fn on_connect_failed(&self, id: PeripheralId, reason: String) {
        if !self.take_pending(&id).await {
            debug!(device = %id, "ignoring failure of an abandoned connection");
            return;
        }
        if let Some(device) = self.devices.write().await.get_mut(&id) {
            device.state = ConnectionState::Disconnected;
        }
        warn!(device = %id, reason = %reason, "connection failed");
        self.events.send(ManagerEvent::ConnectionFailed { device: id, reason });
    }

    async fn on_characteristics(
        &self,
        id: PeripheralId,
        service: uuid::Uuid,
        channels: Vec<thunderboard_types::Channel>,
    ) {
        let (capabilities, reads) = {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.get_mut(&id) else {
                return;
            };
            if device.state != ConnectionState::Connected {
                return;
            }
            let reads: Vec<uuid::Uuid> = registry::IDENTITY_CHANNELS
                .into_iter()
                .filter(|uuid| channels.iter().any(|c| c.uuid == *uuid && c.properties.read))
                .collect();
            device.replace_service_channels(service, channels);
            (device.capabilities().clone(), reads)
        };
        debug!(device = %id, %service, capabilities = capabilities.len(), "characteristics discovered");

        self.channels_changed.notify_waiters();
        self.events.send(ManagerEvent::CapabilitiesChanged {
            device: id.clone(),
            capabilities,
        });
        for uuid in reads {
            if let Err(e) = self.transport.read_value(&id, uuid).await {
                debug!(device = %id, channel = %uuid, error = %e, "identity read failed");
            }
        }
    }

    /// Clear the pending connection if it is `id`'s. Returns true if it was.
    async fn take_pending(&self, id: &PeripheralId) -> bool {
        let mut pending = self.pending_connection.lock().await;
        match pending.as_ref() {
            Some((pending_id, _)) if pending_id == id => {
                if let Some((_, timer)) = pending.take() {
                    timer.abort();
                }
                true
            }
            _ => false,
        }
    }

    async fn connection_timed_out(&self, id: &PeripheralId) {
        {
            let mut pending = self.pending_connection.lock().await;
            match pending.as_ref() {
                // Dropping our own handle without aborting it.
                Some((pending_id, _)) if pending_id == id => drop(pending.take()),
                _ => return,
            }
        }
        if let Some(device) = self.devices.write().await.get_mut(id) {
            device.state = ConnectionState::Disconnected;
        }
        warn!(device = %id, timeout = ?self.config.connection.connection_timeout, "connection timed out");
        if let Err(e) = self.transport.cancel_connection(id).await {
            warn!(device = %id, error = %e, "failed to cancel connection");
        }
        self.events
            .send(ManagerEvent::ConnectionTimedOut { device: id.clone() });
    }

    /// Common disconnect path.
    ///
    /// Demo sessions are invalidated before anything else so their
    /// subscribers learn about the loss first; in-flight correlated
    /// operations and required-channel waits then fail.
    async fn tear_down(&self, id: &PeripheralId, unexpected: bool) {
        let sessions = {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.get_mut(id) else {
                return;
            };
            if device.state == ConnectionState::Disconnected {
                return;
            }
            device.tear_down()
        };
        for session in &sessions {
            session.invalidate();
        }
        let failed = self.correlator.fail_device(id).await;
        self.channels_changed.notify_waiters();

        if unexpected {
            warn!(device = %id, failed_operations = failed, "connection lost");
        } else {
            info!(device = %id, "disconnected");
        }
        self.events.send(ManagerEvent::DeviceDisconnected {
            device: id.clone(),
            unexpected,
        });
    }

    async fn is_connected(&self, id: &PeripheralId) -> bool {
        self.devices
            .read()
            .await
            .get(id)
            .is_some_and(|d| d.state == ConnectionState::Connected)
    }

    /// End every demo session of a device.
    async fn invalidate_sessions(&self, id: &PeripheralId) {
        let sessions = match self.devices.write().await.get_mut(id) {
            Some(device) => std::mem::take(&mut device.sessions),
            None => Vec::new(),
        };
        for session in sessions {
            session.invalidate();
        }
    }
}

/// Manager for Thunderboard demo connections.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use thunderboard_core::mock::{MockPeripheral, MockTransport};
/// use thunderboard_core::{BleManager, ManagerConfig, PeripheralId};
/// use thunderboard_types::DemoKind;
///
/// #[tokio::main]
/// async fn main() -> thunderboard_core::Result<()> {
///     let transport = MockTransport::new();
///     transport.add_peripheral(MockPeripheral::thunderboard_react("react-1")).await;
///
///     let manager = BleManager::new(Arc::new(transport), ManagerConfig::default());
///     manager.start().await?;
///
///     let id = PeripheralId::new("react-1");
///     manager.connect_and_wait(&id).await?;
///     let io = manager.configure_demo(&id, DemoKind::Io).await?.into_io().unwrap();
///     io.set_led(0, true).await?;
///     Ok(())
/// }
/// ```
pub struct BleManager {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BleManager {
    /// Create a manager on top of `transport`. Call [`BleManager::start`]
    /// before issuing requests.
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                devices: RwLock::new(HashMap::new()),
                correlator: Arc::new(Correlator::new()),
                events: EventDispatcher::new(config.event_capacity),
                config,
                channels_changed: Notify::new(),
                pending_connection: Mutex::new(None),
                power: RwLock::new(PowerState::Unknown),
                scanning: AtomicBool::new(false),
            }),
            pump: Mutex::new(None),
        }
    }

    /// Create a manager on the first Bluetooth adapter of the host.
    pub async fn bluetooth(config: ManagerConfig) -> Result<Self> {
        let transport = crate::btle::BtleTransport::with_config(&config.connection).await?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Start consuming transport events.
    pub async fn start(&self) -> Result<()> {
        self.shared.config.validate()?;
        let mut events = self
            .shared
            .transport
            .take_events()
            .await
            .ok_or_else(|| Error::invalid_config("transport events were already taken"))?;

        let power = self.shared.transport.power_state().await;
        *self.shared.power.write().await = power;

        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                shared.handle_event(event).await;
            }
            debug!("transport event stream ended");
        });
        *self.pump.lock().await = Some(pump);
        info!(?power, "manager started");
        Ok(())
    }

    /// Stop the event pump and disconnect every board.
    pub async fn stop(&self) -> Result<()> {
        let result = self.shared.transport.disconnect_all().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        result
    }

    /// Apply a transport event directly. The pump calls this for every
    /// event it receives.
    pub async fn handle_event(&self, event: TransportEvent) {
        self.shared.handle_event(event).await;
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub async fn power_state(&self) -> PowerState {
        *self.shared.power.read().await
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::Acquire)
    }

    pub async fn device(&self, id: &PeripheralId) -> Option<DeviceSnapshot> {
        self.shared.devices.read().await.get(id).map(Device::snapshot)
    }

    /// Every known board, sorted by ID.
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        let mut devices: Vec<DeviceSnapshot> = self
            .shared
            .devices
            .read()
            .await
            .values()
            .map(Device::snapshot)
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Find a known board by ID or name (case-insensitive).
    pub async fn find_device(&self, identifier: &str) -> Option<DeviceSnapshot> {
        let needle = identifier.to_lowercase();
        self.devices().await.into_iter().find(|d| {
            d.id.as_str().eq_ignore_ascii_case(identifier)
                || d.name.as_deref().is_some_and(|n| n.to_lowercase().contains(&needle))
        })
    }

    // --- Scanning ---

    pub async fn start_scan(&self) -> Result<()> {
        if self.power_state().await == PowerState::Disabled {
            return Err(Error::PoweredOff);
        }
        self.shared.transport.start_scan().await?;
        if !self.shared.scanning.swap(true, Ordering::AcqRel) {
            info!("scan started");
            self.shared.events.send(ManagerEvent::ScanStarted);
        }
        Ok(())
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.shared.transport.stop_scan().await?;
        if self.shared.scanning.swap(false, Ordering::AcqRel) {
            info!("scan stopped");
            self.shared.events.send(ManagerEvent::ScanStopped);
        }
        Ok(())
    }

    /// Scan for the configured window and return every known board.
    pub async fn scan(&self) -> Result<Vec<DeviceSnapshot>> {
        self.start_scan().await?;
        sleep(self.shared.config.scan_duration).await;
        self.stop_scan().await?;
        Ok(self.devices().await)
    }

    // --- Connection Management ---

    /// Request a connection to `id`.
    ///
    /// Returns once the request is issued. Only one connection attempt may
    /// be pending at a time. If the radio does not answer within the
    /// connection timeout the attempt is cancelled and `ConnectionTimedOut`
    /// is emitted.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %id))]
    pub async fn connect(&self, id: &PeripheralId) -> Result<()> {
        if self.power_state().await == PowerState::Disabled {
            return Err(Error::PoweredOff);
        }

        let mut pending = self.shared.pending_connection.lock().await;
        if let Some((pending_id, _)) = pending.as_ref() {
            if pending_id == id {
                return Ok(());
            }
            return Err(Error::ConnectionPending);
        }

        {
            let mut devices = self.shared.devices.write().await;
            let device = devices
                .entry(id.clone())
                .or_insert_with(|| Device::new(id.clone()));
            if device.state == ConnectionState::Connected {
                return Ok(());
            }
            device.state = ConnectionState::Connecting;
        }
        self.shared
            .events
            .send(ManagerEvent::ConnectionStarted { device: id.clone() });

        let timeout = self.shared.config.connection.connection_timeout;
        let timer = {
            let shared = Arc::clone(&self.shared);
            let id = id.clone();
            tokio::spawn(async move {
                sleep(timeout).await;
                shared.connection_timed_out(&id).await;
            })
        };
        *pending = Some((id.clone(), timer));
        drop(pending);

        info!("connecting");
        if let Err(e) = self.shared.transport.connect(id).await {
            self.shared.take_pending(id).await;
            if let Some(device) = self.shared.devices.write().await.get_mut(id) {
                device.state = ConnectionState::Disconnected;
            }
            self.shared.events.send(ManagerEvent::ConnectionFailed {
                device: id.clone(),
                reason: e.to_string(),
            });
            return Err(match e {
                Error::PoweredOff => Error::PoweredOff,
                other => Error::connection_failed(
                    Some(id.to_string()),
                    ConnectionFailureReason::BleError(other.to_string()),
                ),
            });
        }
        Ok(())
    }

    /// Connect and wait until the board is connected, the attempt failed or
    /// it timed out. Returns the connection epoch.
    pub async fn connect_and_wait(&self, id: &PeripheralId) -> Result<u64> {
        let mut events = self.subscribe();
        if let Some(device) = self.device(id).await {
            if device.is_connected() {
                return Ok(device.epoch);
            }
        }
        self.connect(id).await?;

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "lagged while waiting for connection");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(Error::Cancelled);
                }
            };
            match event {
                ManagerEvent::DeviceConnected { device, epoch } if &device == id => {
                    return Ok(epoch);
                }
                ManagerEvent::ConnectionTimedOut { device } if &device == id => {
                    return Err(Error::connection_failed(
                        Some(id.to_string()),
                        ConnectionFailureReason::Timeout,
                    ));
                }
                ManagerEvent::ConnectionFailed { device, reason } if &device == id => {
                    return Err(Error::connection_failed(
                        Some(id.to_string()),
                        ConnectionFailureReason::Other(reason),
                    ));
                }
                ManagerEvent::PowerStateChanged {
                    state: PowerState::Disabled,
                } => return Err(Error::PoweredOff),
                _ => {}
            }
        }
    }

    /// Disconnect `id` on the user's request.
    ///
    /// A pending connection attempt is cancelled instead.
    #[tracing::instrument(level = "debug", skip(self), fields(device = %id))]
    pub async fn disconnect(&self, id: &PeripheralId) -> Result<()> {
        let state = self
            .shared
            .devices
            .read()
            .await
            .get(id)
            .map(|d| d.state)
            .ok_or_else(|| Error::device_not_found(id.as_str()))?;

        match state {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting => {
                self.shared.take_pending(id).await;
                self.shared.transport.cancel_connection(id).await?;
                self.shared.tear_down(id, false).await;
                Ok(())
            }
            ConnectionState::Connected => self.shared.transport.disconnect(id).await,
        }
    }

    // --- Demo Configuration ---

    /// Configure a connected board for `kind`.
    ///
    /// A second request for the same board while one is running fails with
    /// [`Error::ConfigurationInProgress`] and has no other effect. A board
    /// that runs another demo is reset first and its old demo connection
    /// ends.
    #[tracing::instrument(skip(self), fields(device = %id, demo = %kind))]
    pub async fn configure_demo(&self, id: &PeripheralId, kind: DemoKind) -> Result<DemoConnection> {
        let (_guard, epoch, previous) = {
            let devices = self.shared.devices.read().await;
            let device = devices
                .get(id)
                .ok_or_else(|| Error::device_not_found(id.as_str()))?;
            if device.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            let guard = device
                .try_begin_configuration()
                .ok_or(Error::ConfigurationInProgress)?;
            (guard, device.epoch, device.demo)
        };

        if let Some(previous) = previous {
            info!(%previous, "switching demo");
            self.run_reset(id, epoch).await?;
        }

        match ConfigurationPlan::for_demo(kind)
            .execute(Arc::clone(&self.shared), id.clone(), epoch)
            .await
        {
            Ok(configured) => match configured.connection {
                Some(connection) => {
                    self.shared.events.send(ManagerEvent::ConfigurationReady {
                        device: id.clone(),
                        demo: kind,
                    });
                    Ok(connection)
                }
                None => Err(self.configuration_failed(id, Some(kind), Error::Cancelled)),
            },
            Err(e) => Err(self.configuration_failed(id, Some(kind), e)),
        }
    }

    /// Quiesce a connected board and end its demo connection.
    #[tracing::instrument(skip(self), fields(device = %id))]
    pub async fn reset_configuration(&self, id: &PeripheralId) -> Result<()> {
        let (_guard, epoch) = {
            let devices = self.shared.devices.read().await;
            let device = devices
                .get(id)
                .ok_or_else(|| Error::device_not_found(id.as_str()))?;
            if device.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            let guard = device
                .try_begin_configuration()
                .ok_or(Error::ConfigurationInProgress)?;
            (guard, device.epoch)
        };
        self.run_reset(id, epoch).await
    }

    async fn run_reset(&self, id: &PeripheralId, epoch: u64) -> Result<()> {
        self.shared.invalidate_sessions(id).await;
        match ConfigurationPlan::reset()
            .execute(Arc::clone(&self.shared), id.clone(), epoch)
            .await
        {
            Ok(_) => {
                self.shared
                    .events
                    .send(ManagerEvent::ConfigurationReset { device: id.clone() });
                Ok(())
            }
            Err(e) => Err(self.configuration_failed(id, None, e)),
        }
    }

    fn configuration_failed(&self, id: &PeripheralId, demo: Option<DemoKind>, error: Error) -> Error {
        let label = demo.map_or(DemoLabel::Reset, DemoLabel::Demo);
        warn!(device = %id, %label, error = %error, "configuration failed");
        self.shared.events.send(ManagerEvent::ConfigurationFailed {
            device: id.clone(),
            demo,
            reason: error.to_string(),
        });
        Error::ConfigurationFailed {
            demo: label,
            reason: error.to_string(),
        }
    }
}

impl Drop for BleManager {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.try_lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
    }
}
