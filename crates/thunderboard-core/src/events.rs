//! Lifecycle event system.
//!
//! The manager fans out power, discovery, connection and configuration
//! events to any number of subscribers over a broadcast channel.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use thunderboard_types::{Capability, DemoKind, PowerState};

use crate::transport::PeripheralId;

/// Events emitted by [`crate::BleManager`].
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ManagerEvent {
    /// The host radio changed power state.
    PowerStateChanged { state: PowerState },
    ScanStarted,
    ScanStopped,
    /// A board was seen for the first time.
    DeviceDiscovered {
        device: PeripheralId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// Name, RSSI or identity fields of a known board changed.
    DeviceUpdated { device: PeripheralId },
    /// A connection attempt started.
    ConnectionStarted { device: PeripheralId },
    /// The connection attempt exceeded its timeout and was cancelled.
    ConnectionTimedOut { device: PeripheralId },
    /// The transport rejected the connection attempt.
    ConnectionFailed { device: PeripheralId, reason: String },
    /// Connected; `epoch` identifies this connection.
    DeviceConnected { device: PeripheralId, epoch: u64 },
    /// Channel discovery changed the board's capabilities.
    CapabilitiesChanged {
        device: PeripheralId,
        capabilities: BTreeSet<Capability>,
    },
    /// The link dropped. Only `unexpected` disconnects warrant an alert.
    DeviceDisconnected { device: PeripheralId, unexpected: bool },
    /// A demo configuration graph started.
    ConfigurationStarted { device: PeripheralId, demo: DemoKind },
    /// A demo connection was handed off.
    ConfigurationReady { device: PeripheralId, demo: DemoKind },
    /// A configuration graph failed; no demo connection was produced.
    ConfigurationFailed {
        device: PeripheralId,
        demo: Option<DemoKind>,
        reason: String,
    },
    /// Notifications were quiesced and the previous demo ended.
    ConfigurationReset { device: PeripheralId },
}

impl ManagerEvent {
    /// The device this event concerns, if any.
    pub fn device(&self) -> Option<&PeripheralId> {
        match self {
            Self::PowerStateChanged { .. } | Self::ScanStarted | Self::ScanStopped => None,
            Self::DeviceDiscovered { device, .. }
            | Self::DeviceUpdated { device }
            | Self::ConnectionStarted { device }
            | Self::ConnectionTimedOut { device }
            | Self::ConnectionFailed { device, .. }
            | Self::DeviceConnected { device, .. }
            | Self::CapabilitiesChanged { device, .. }
            | Self::DeviceDisconnected { device, .. }
            | Self::ConfigurationStarted { device, .. }
            | Self::ConfigurationReady { device, .. }
            | Self::ConfigurationFailed { device, .. }
            | Self::ConfigurationReset { device } => Some(device),
        }
    }
}

/// Sender for manager events.
pub type EventSender = broadcast::Sender<ManagerEvent>;

/// Receiver for manager events.
pub type EventReceiver = broadcast::Receiver<ManagerEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ManagerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ManagerEvent::DeviceDisconnected {
            device: PeripheralId::new("dev-1"),
            unexpected: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"device_disconnected","device":"dev-1","unexpected":true}"#
        );

        let back: ManagerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_configuration_event_names_demo() {
        let event = ManagerEvent::ConfigurationReady {
            device: PeripheralId::new("dev-1"),
            demo: DemoKind::Motion,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""demo":"motion""#));
        assert_eq!(event.device().map(PeripheralId::as_str), Some("dev-1"));
    }

    #[tokio::test]
    async fn test_dispatcher_fan_out() {
        let dispatcher = EventDispatcher::default();
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(ManagerEvent::ScanStarted);
        assert_eq!(first.recv().await.unwrap(), ManagerEvent::ScanStarted);
        assert_eq!(second.recv().await.unwrap(), ManagerEvent::ScanStarted);
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        EventDispatcher::new(4).send(ManagerEvent::ScanStopped);
    }
}
