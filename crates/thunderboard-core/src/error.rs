//! Error types for thunderboard-core.
//!
//! This module defines all error types that can occur when scanning for,
//! connecting to and configuring Thunderboard boards.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Timeout`] | Retry the operation | Transient BLE congestion |
//! | [`Error::Bluetooth`] | Retry, then reconnect | May be transient or connection lost |
//! | [`Error::NotConnected`] | Reconnect | Connection was lost |
//! | [`Error::ConnectionFailed`] | Retry with backoff | Board may be busy or out of range |
//! | [`Error::ConnectionPending`] | Wait for the pending attempt | Only one board connects at a time |
//! | [`Error::ConfigurationInProgress`] | Wait, do not retry immediately | A graph is already running on the board |
//! | [`Error::ConfigurationFailed`] | Reconfigure | A notify toggle or the channel wait failed |
//! | [`Error::DemoDisconnected`] | Configure a new demo | The demo connection belongs to a dead epoch |
//! | [`Error::ChannelNotFound`] | Do not retry | The board does not expose the channel |
//! | [`Error::PoweredOff`] | Wait for the adapter | Radio is off |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! ## Recommended Timeouts
//!
//! | Operation | Default | Notes |
//! |-----------|---------|-------|
//! | Connection | 5 seconds | Cancelled on the transport when exceeded |
//! | Required channel wait | 15 seconds | Rechecked every 250 ms and on discovery |
//! | Notify toggle | 10 seconds | Per channel |
//! | Read / write | 10 seconds | btleplug transport only |

use std::time::Duration;

use thiserror::Error;

use thunderboard_types::DemoKind;

/// Errors that can occur when communicating with Thunderboard boards.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not known to the transport or the manager.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation attempted while not connected to the device.
    #[error("Not connected to device")]
    NotConnected,

    /// The board does not expose a channel the operation needs.
    #[error("Channel not found: {uuid}")]
    ChannelNotFound {
        /// The UUID that was not found.
        uuid: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Write operation failed.
    #[error("Write failed to channel {uuid}: {reason}")]
    WriteFailed {
        /// The channel UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Enabling or disabling notifications failed.
    #[error("Notify toggle failed on channel {uuid}: {reason}")]
    NotifyFailed {
        /// The channel UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Read operation failed.
    #[error("Read failed from channel {uuid}: {reason}")]
    ReadFailed {
        /// The channel UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Another configuration graph is running on the same device.
    #[error("A demo configuration is already in progress on this device")]
    ConfigurationInProgress,

    /// A configuration graph failed; no demo connection was produced.
    #[error("Configuration of {demo} failed: {reason}")]
    ConfigurationFailed {
        /// Demo being configured, or `None` for a reset.
        demo: DemoLabel,
        /// Why the graph failed.
        reason: String,
    },

    /// A task graph task failed.
    #[error("Task '{task}' failed: {reason}")]
    TaskFailed {
        /// Task name.
        task: String,
        /// Failure reason reported by the task.
        reason: String,
    },

    /// Another device is already connecting.
    #[error("Another connection attempt is pending")]
    ConnectionPending,

    /// The demo connection was invalidated by a disconnect.
    #[error("Demo device disconnected")]
    DemoDisconnected,

    /// The Bluetooth radio is powered off.
    #[error("Bluetooth is powered off")]
    PoweredOff,

    /// A command argument was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Name of what a configuration graph was configuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoLabel {
    /// A demo configuration.
    Demo(DemoKind),
    /// The reset graph that quiesces a board.
    Reset,
}

impl std::fmt::Display for DemoLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo(kind) => write!(f, "{} demo", kind),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(identifier.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a channel not found error.
    pub fn channel_not_found(uuid: impl ToString) -> Self {
        Self::ChannelNotFound {
            uuid: uuid.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a task failure.
    pub fn task_failed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

impl From<thunderboard_types::ParseError> for Error {
    fn from(err: thunderboard_types::ParseError) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

/// Result type alias using thunderboard-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
