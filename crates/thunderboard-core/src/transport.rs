//! Transport abstraction over a BLE central.
//!
//! A [`Transport`] issues requests to the radio and reports every completion
//! later as a [`TransportEvent`]. Request methods return as soon as the
//! request is issued; nothing here waits for the peripheral. The
//! [`crate::BleManager`] consumes the event stream in order, which is the
//! single place device state is mutated.
//!
//! Two implementations ship with the crate: [`crate::btle::BtleTransport`]
//! on top of btleplug, and [`crate::mock::MockTransport`] for tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use thunderboard_types::{Channel, PowerState};

use crate::error::Result;

/// Opaque identifier of a peripheral as reported by the transport.
///
/// On macOS this is a CoreBluetooth UUID, elsewhere usually the MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    /// Create a new peripheral ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Completions and unsolicited updates delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The host radio changed power state.
    PowerStateChanged(PowerState),
    /// An advertisement was received while scanning.
    Discovered {
        id: PeripheralId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// A connect request succeeded.
    Connected { id: PeripheralId },
    /// A connect request failed.
    ConnectFailed { id: PeripheralId, reason: String },
    /// The link dropped. `expected` is true when the disconnect was requested.
    Disconnected { id: PeripheralId, expected: bool },
    /// Service discovery finished.
    ServicesDiscovered { id: PeripheralId, services: Vec<Uuid> },
    /// Characteristic discovery finished for one service.
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: Uuid,
        channels: Vec<Channel>,
    },
    /// A read completed or a notification/indication arrived.
    ValueUpdated {
        id: PeripheralId,
        uuid: Uuid,
        value: Vec<u8>,
    },
    /// A read request failed.
    ReadFailed {
        id: PeripheralId,
        uuid: Uuid,
        error: String,
    },
    /// A set-notify request completed.
    NotifyStateChanged {
        id: PeripheralId,
        uuid: Uuid,
        enabled: bool,
        error: Option<String>,
    },
    /// A write request completed.
    WriteConfirmed {
        id: PeripheralId,
        uuid: Uuid,
        error: Option<String>,
    },
}

impl TransportEvent {
    /// The peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::PowerStateChanged(_) => None,
            Self::Discovered { id, .. }
            | Self::Connected { id }
            | Self::ConnectFailed { id, .. }
            | Self::Disconnected { id, .. }
            | Self::ServicesDiscovered { id, .. }
            | Self::CharacteristicsDiscovered { id, .. }
            | Self::ValueUpdated { id, .. }
            | Self::ReadFailed { id, .. }
            | Self::NotifyStateChanged { id, .. }
            | Self::WriteConfirmed { id, .. } => Some(id),
        }
    }
}

/// Sender half used by transports to publish events.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half consumed by the manager.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A BLE central as seen by the demo core.
///
/// Channel operations address a channel by UUID. Because a board may expose
/// two channels with the same UUID (digital input and digital output), the
/// implementation picks the channel whose properties support the requested
/// operation.
///
/// # Example
///
/// ```ignore
/// use thunderboard_core::{PeripheralId, Transport};
///
/// async fn connect_all<T: Transport>(transport: &T, ids: &[PeripheralId]) {
///     for id in ids {
///         let _ = transport.connect(id).await;
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Take the event receiver. Returns `None` after the first call.
    async fn take_events(&self) -> Option<TransportEventReceiver>;

    /// Current radio power state.
    async fn power_state(&self) -> PowerState;

    // --- Scanning ---

    async fn start_scan(&self) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    // --- Connection Management ---

    /// Request a connection. Completes with `Connected` or `ConnectFailed`.
    async fn connect(&self, id: &PeripheralId) -> Result<()>;

    /// Abandon a pending connection attempt.
    async fn cancel_connection(&self, id: &PeripheralId) -> Result<()>;

    /// Request a disconnect. Completes with `Disconnected { expected: true }`.
    async fn disconnect(&self, id: &PeripheralId) -> Result<()>;

    /// Disconnect every connected peripheral.
    async fn disconnect_all(&self) -> Result<()>;

    // --- Discovery ---

    /// Completes with `ServicesDiscovered`.
    async fn discover_services(&self, id: &PeripheralId) -> Result<()>;

    /// Completes with `CharacteristicsDiscovered` for `service`.
    async fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) -> Result<()>;

    // --- Channel Operations ---

    /// Completes with `ValueUpdated` or `ReadFailed`.
    async fn read_value(&self, id: &PeripheralId, uuid: Uuid) -> Result<()>;

    /// Completes with `WriteConfirmed`.
    async fn write_value(&self, id: &PeripheralId, uuid: Uuid, value: &[u8]) -> Result<()>;

    /// Completes with `NotifyStateChanged`.
    async fn set_notify(&self, id: &PeripheralId, uuid: Uuid, enabled: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_display() {
        let id = PeripheralId::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(PeripheralId::from("x"), PeripheralId::new("x"));
    }

    #[test]
    fn test_peripheral_id_serializes_transparently() {
        let id = PeripheralId::new("dev-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dev-1\"");
    }

    #[test]
    fn test_event_peripheral() {
        let id = PeripheralId::new("dev-1");
        let event = TransportEvent::Connected { id: id.clone() };
        assert_eq!(event.peripheral(), Some(&id));
        assert_eq!(
            TransportEvent::PowerStateChanged(PowerState::Enabled).peripheral(),
            None
        );
    }
}
