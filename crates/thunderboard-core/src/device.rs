//! Per-board state tracked by the manager.
//!
//! A [`Device`] is created on the first advertisement or connection attempt
//! and is owned exclusively by [`crate::BleManager`]. Everything derived from
//! the connection (channels, capabilities, notify state, power) is cleared on
//! disconnect; identity (name, board ID, model, firmware) survives so a
//! reconnecting board keeps its label.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use thunderboard_types::{
    BoardId, Capability, Channel, ConnectionState, DemoKind, DeviceModel, PowerSource, decode,
    registry, uuids,
};

use crate::demo::DemoSession;
use crate::error::{Error, Result};
use crate::transport::PeripheralId;

/// Default timeout for a connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for one notify-toggle task.
const DEFAULT_CONFIGURATION_TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for a demo's required channels.
const DEFAULT_REQUIRED_CHANNELS_TIMEOUT: Duration = Duration::from_secs(15);

/// Default recheck interval while waiting for required channels.
const DEFAULT_REQUIRED_CHANNELS_RECHECK: Duration = Duration::from_millis(250);

/// Default environment demo poll period.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connection and configuration timeouts.
///
/// Use this to customize timeout values for different environments.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use thunderboard_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(8))
///     .required_channels_timeout(Duration::from_secs(20));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for each notify-toggle task of a configuration graph.
    pub configuration_task_timeout: Duration,
    /// Timeout for the "wait for required channels" task.
    pub required_channels_timeout: Duration,
    /// Recheck interval of the "wait for required channels" task.
    pub required_channels_recheck: Duration,
    /// Environment demo poll period.
    pub environment_poll_interval: Duration,
    /// Timeout for BLE read operations.
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            configuration_task_timeout: DEFAULT_CONFIGURATION_TASK_TIMEOUT,
            required_channels_timeout: DEFAULT_REQUIRED_CHANNELS_TIMEOUT,
            required_channels_recheck: DEFAULT_REQUIRED_CHANNELS_RECHECK,
            environment_poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for challenging RF environments.
    ///
    /// Uses longer timeouts to accommodate signal interference,
    /// thick walls, or long distances.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(15),
            configuration_task_timeout: Duration::from_secs(20),
            required_channels_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Create a config for fast, reliable environments.
    ///
    /// Uses shorter timeouts for quicker failure detection
    /// when boards are nearby with strong signals.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(3),
            configuration_task_timeout: Duration::from_secs(5),
            required_channels_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-task configuration timeout.
    #[must_use]
    pub fn configuration_task_timeout(mut self, timeout: Duration) -> Self {
        self.configuration_task_timeout = timeout;
        self
    }

    /// Set the required channel wait timeout.
    #[must_use]
    pub fn required_channels_timeout(mut self, timeout: Duration) -> Self {
        self.required_channels_timeout = timeout;
        self
    }

    /// Set the required channel recheck interval.
    #[must_use]
    pub fn required_channels_recheck(mut self, interval: Duration) -> Self {
        self.required_channels_recheck = interval;
        self
    }

    /// Set the environment poll interval.
    #[must_use]
    pub fn environment_poll_interval(mut self, interval: Duration) -> Self {
        self.environment_poll_interval = interval;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Check that every duration is usable.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("connection_timeout", self.connection_timeout),
            ("configuration_task_timeout", self.configuration_task_timeout),
            ("required_channels_timeout", self.required_channels_timeout),
            ("required_channels_recheck", self.required_channels_recheck),
            ("environment_poll_interval", self.environment_poll_interval),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(Error::invalid_config(format!("{} must be non-zero", name)));
            }
        }
        if self.required_channels_recheck >= self.required_channels_timeout {
            return Err(Error::invalid_config(
                "required_channels_recheck must be shorter than required_channels_timeout",
            ));
        }
        Ok(())
    }
}

/// Signal strength quality levels based on RSSI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    /// Signal too weak for reliable operation (< -85 dBm).
    Poor,
    /// Usable but may have issues (-85 to -75 dBm).
    Fair,
    /// Good signal strength (-75 to -60 dBm).
    Good,
    /// Excellent signal strength (> -60 dBm).
    Excellent,
}

impl SignalQuality {
    /// Determine signal quality from RSSI value in dBm.
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            r if r > -60 => SignalQuality::Excellent,
            r if r > -75 => SignalQuality::Good,
            r if r > -85 => SignalQuality::Fair,
            _ => SignalQuality::Poor,
        }
    }

    /// Get a human-readable description of the signal quality.
    pub fn description(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "Excellent signal",
            SignalQuality::Good => "Good signal",
            SignalQuality::Fair => "Fair signal - connection may be unstable",
            SignalQuality::Poor => "Poor signal - consider moving closer",
        }
    }
}

/// Mutable state of one board. Owned by the manager.
pub(crate) struct Device {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub board_id: Option<BoardId>,
    pub rssi: Option<i16>,
    power_source_raw: Option<u8>,
    battery_level: Option<u8>,
    pub power_source: PowerSource,
    pub firmware_version: Option<String>,
    pub model: DeviceModel,
    pub state: ConnectionState,
    channels: Vec<Channel>,
    capabilities: BTreeSet<Capability>,
    /// Channels whose notifications the board confirmed as enabled.
    pub notifying: BTreeSet<Uuid>,
    /// Incremented on every successful connect.
    pub epoch: u64,
    /// Demo currently configured, if any.
    pub demo: Option<DemoKind>,
    pub sessions: Vec<Arc<dyn DemoSession>>,
    configuring: Arc<AtomicBool>,
}

impl Device {
    pub fn new(id: PeripheralId) -> Self {
        Self {
            id,
            name: None,
            board_id: None,
            rssi: None,
            power_source_raw: None,
            battery_level: None,
            power_source: PowerSource::Unknown,
            firmware_version: None,
            model: DeviceModel::Unknown,
            state: ConnectionState::Disconnected,
            channels: Vec::new(),
            capabilities: BTreeSet::new(),
            notifying: BTreeSet::new(),
            epoch: 0,
            demo: None,
            sessions: Vec::new(),
            configuring: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    /// Enter the connected state for a new epoch.
    pub fn begin_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.state = ConnectionState::Connected;
        self.channels.clear();
        self.capabilities.clear();
        self.notifying.clear();
        self.epoch
    }

    /// Replace the channels of one service and recompute capabilities.
    pub fn replace_service_channels(&mut self, service: Uuid, channels: Vec<Channel>) {
        self.channels.retain(|c| c.service != service);
        self.channels.extend(channels);
        self.capabilities = registry::capabilities(&self.channels);
    }

    /// Whether every channel in `required` has been discovered.
    pub fn has_channels(&self, required: &BTreeSet<Uuid>) -> bool {
        required
            .iter()
            .all(|uuid| self.channels.iter().any(|c| c.uuid == *uuid))
    }

    /// Store a received value and refresh identity fields.
    ///
    /// Returns true when a user-visible field changed.
    pub fn apply_value(&mut self, uuid: Uuid, value: &[u8]) -> bool {
        if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|c| c.uuid == uuid && (c.properties.read || c.properties.supports_notify()))
        {
            channel.value = Some(value.to_vec());
        }

        match uuid {
            uuids::DEVICE_NAME => {
                let name = decode::string(value);
                if name.is_some() && name != self.name {
                    self.name = name;
                    return true;
                }
            }
            uuids::MODEL_NUMBER => {
                if let Some(model) = decode::string(value) {
                    let model = DeviceModel::from_model_number(&model);
                    if model != self.model {
                        self.model = model;
                        return true;
                    }
                }
            }
            uuids::FIRMWARE_REVISION => {
                let firmware = decode::string(value);
                if firmware.is_some() && firmware != self.firmware_version {
                    self.firmware_version = firmware;
                    return true;
                }
            }
            uuids::SYSTEM_IDENTIFIER => {
                let board_id = decode::board_id(value);
                if board_id.is_some() && board_id != self.board_id {
                    self.board_id = board_id;
                    return true;
                }
            }
            uuids::POWER_SOURCE => {
                self.power_source_raw = decode::power_source(value);
                return self.refresh_power_source();
            }
            uuids::BATTERY_LEVEL => {
                self.battery_level = decode::battery_level(value);
                return self.refresh_power_source();
            }
            _ => {}
        }
        false
    }

    fn refresh_power_source(&mut self) -> bool {
        let power = PowerSource::resolve(self.power_source_raw, self.battery_level);
        let changed = power != self.power_source;
        self.power_source = power;
        changed
    }

    /// Clear everything derived from the connection.
    ///
    /// Returns the demo sessions that were bound to the dropped epoch.
    pub fn tear_down(&mut self) -> Vec<Arc<dyn DemoSession>> {
        self.state = ConnectionState::Disconnected;
        self.channels.clear();
        self.capabilities.clear();
        self.notifying.clear();
        self.rssi = None;
        self.power_source_raw = None;
        self.battery_level = None;
        self.power_source = PowerSource::Unknown;
        self.demo = None;
        std::mem::take(&mut self.sessions)
    }

    /// Mark a configuration as running. Fails if one already is.
    pub fn try_begin_configuration(&self) -> Option<ConfigurationGuard> {
        self.configuring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConfigurationGuard(Arc::clone(&self.configuring)))
    }

    pub fn is_configuring(&self) -> bool {
        self.configuring.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            board_id: self.board_id,
            rssi: self.rssi,
            signal: self.rssi.map(SignalQuality::from_rssi),
            power_source: self.power_source,
            firmware_version: self.firmware_version.clone(),
            model: self.model,
            state: self.state,
            capabilities: self.capabilities.clone(),
            epoch: self.epoch,
            demo: self.demo,
            configuring: self.is_configuring(),
        }
    }
}

/// Clears the device's configuring flag when dropped.
pub(crate) struct ConfigurationGuard(Arc<AtomicBool>);

impl Drop for ConfigurationGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Read-only copy of a device's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: PeripheralId,
    pub name: Option<String>,
    /// 24-bit board identifier from the System ID channel.
    pub board_id: Option<BoardId>,
    pub rssi: Option<i16>,
    pub signal: Option<SignalQuality>,
    pub power_source: PowerSource,
    pub firmware_version: Option<String>,
    pub model: DeviceModel,
    pub state: ConnectionState,
    pub capabilities: BTreeSet<Capability>,
    /// Connection epoch; increments on every connect.
    pub epoch: u64,
    /// Demo currently configured.
    pub demo: Option<DemoKind>,
    /// Whether a configuration graph is running.
    pub configuring: bool,
}

impl DeviceSnapshot {
    /// Name to show for the device.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thunderboard_types::ChannelProperties;

    fn device() -> Device {
        Device::new(PeripheralId::new("dev-1"))
    }

    #[test]
    fn test_default_config_matches_documented_values() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.configuration_task_timeout, Duration::from_secs(10));
        assert_eq!(config.required_channels_timeout, Duration::from_secs(15));
        assert_eq!(config.required_channels_recheck, Duration::from_millis(250));
        assert_eq!(config.environment_poll_interval, Duration::from_secs(3));
        assert!(config.validate().is_ok());
        assert!(ConnectionConfig::fast().validate().is_ok());
        assert!(ConnectionConfig::challenging_environment().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = ConnectionConfig::default().connection_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ConnectionConfig::default()
            .required_channels_recheck(Duration::from_secs(20))
            .required_channels_timeout(Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signal_quality_from_rssi() {
        assert_eq!(SignalQuality::from_rssi(-45), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-70), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-80), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-95), SignalQuality::Poor);
    }

    #[test]
    fn test_epoch_increments_and_clears_channels() {
        let mut device = device();
        assert_eq!(device.begin_epoch(), 1);
        device.replace_service_channels(
            uuids::AUTOMATION_IO_SERVICE,
            vec![Channel::new(
                uuids::DIGITAL,
                uuids::AUTOMATION_IO_SERVICE,
                ChannelProperties::notifiable(),
            )],
        );
        assert!(device.capabilities().contains(&Capability::DigitalInput));

        assert_eq!(device.begin_epoch(), 2);
        assert!(device.channels().is_empty());
        assert!(device.capabilities().is_empty());
    }

    #[test]
    fn test_replace_service_channels_keeps_other_services() {
        let mut device = device();
        device.begin_epoch();
        device.replace_service_channels(
            uuids::ENVIRONMENTAL_SENSING_SERVICE,
            vec![Channel::new(
                uuids::TEMPERATURE,
                uuids::ENVIRONMENTAL_SENSING_SERVICE,
                ChannelProperties::readable(),
            )],
        );
        device.replace_service_channels(
            uuids::AUTOMATION_IO_SERVICE,
            vec![Channel::new(
                uuids::DIGITAL,
                uuids::AUTOMATION_IO_SERVICE,
                ChannelProperties::notifiable(),
            )],
        );
        device.replace_service_channels(uuids::AUTOMATION_IO_SERVICE, Vec::new());

        assert!(device.has_channels(&BTreeSet::from([uuids::TEMPERATURE])));
        assert!(!device.has_channels(&BTreeSet::from([uuids::DIGITAL])));
    }

    #[test]
    fn test_identity_values() {
        let mut device = device();
        assert!(device.apply_value(uuids::MODEL_NUMBER, b"BRD4166A\0"));
        assert_eq!(device.model, DeviceModel::Sense);
        assert!(!device.apply_value(uuids::MODEL_NUMBER, b"BRD4166A"));

        assert!(device.apply_value(uuids::SYSTEM_IDENTIFIER, &0x1234_5678u64.to_le_bytes()));
        assert_eq!(device.board_id, Some(BoardId(0x34_5678)));

        assert!(device.apply_value(uuids::BATTERY_LEVEL, &[77]));
        assert!(device.apply_value(uuids::POWER_SOURCE, &[4]));
        assert_eq!(device.power_source, PowerSource::CoinCell { level: Some(77) });

        assert!(!device.apply_value(uuids::TEMPERATURE, &[0, 0]));
    }

    #[test]
    fn test_tear_down_keeps_identity() {
        let mut device = device();
        device.begin_epoch();
        device.apply_value(uuids::FIRMWARE_REVISION, b"2.1.0");
        device.apply_value(uuids::POWER_SOURCE, &[1]);
        device.rssi = Some(-60);
        device.demo = Some(DemoKind::Io);

        let sessions = device.tear_down();
        assert!(sessions.is_empty());
        assert_eq!(device.state, ConnectionState::Disconnected);
        assert_eq!(device.firmware_version.as_deref(), Some("2.1.0"));
        assert_eq!(device.power_source, PowerSource::Unknown);
        assert_eq!(device.rssi, None);
        assert_eq!(device.demo, None);
        assert_eq!(device.epoch, 1);
    }

    #[test]
    fn test_configuration_guard_is_exclusive() {
        let device = device();
        let guard = device.try_begin_configuration();
        assert!(guard.is_some());
        assert!(device.is_configuring());
        assert!(device.try_begin_configuration().is_none());

        drop(guard);
        assert!(!device.is_configuring());
        assert!(device.try_begin_configuration().is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut device = device();
        device.name = Some("Thunder React #12345".to_string());
        device.rssi = Some(-58);
        let snapshot = device.snapshot();
        assert_eq!(snapshot.display_name(), "Thunder React #12345");
        assert_eq!(snapshot.signal, Some(SignalQuality::Excellent));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"state\":\"disconnected\""));
    }
}
