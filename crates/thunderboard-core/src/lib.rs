//! Core BLE library for Thunderboard development boards.
//!
//! This crate connects to Silicon Labs Thunderboard React and Sense boards,
//! configures one of three demos on them and exposes a live connection
//! object per demo.
//!
//! # Features
//!
//! - **Scanning and connection management**: one pending connection at a
//!   time, bounded by a timeout, with power-state tracking
//! - **Demo configuration**: dependency-ordered task graphs that enable the
//!   notifications a demo needs and disable everything else
//! - **Demo connections**: digital I/O (buttons, LEDs, RGB), environment
//!   polling, motion (orientation, acceleration, wheel revolutions)
//! - **Lifecycle events**: serializable [`ManagerEvent`]s over a broadcast
//!   channel
//! - **Testability**: [`mock::MockTransport`] simulates boards without
//!   hardware
//!
//! # Supported Boards
//!
//! | Board | Demos |
//! |-------|-------|
//! | Thunderboard React (RD-0057) | I/O, Environment (temperature, humidity, UV), Motion with revolutions |
//! | Thunderboard Sense (BRD4160/4166/4184) | I/O with RGB, full Environment, Motion |
//!
//! # Quick Start
//!
//! ```no_run
//! use thunderboard_core::{BleManager, ManagerConfig, PeripheralId};
//! use thunderboard_types::DemoKind;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = BleManager::bluetooth(ManagerConfig::default()).await?;
//!     manager.start().await?;
//!
//!     // Scan for boards
//!     let boards = manager.scan().await?;
//!     let Some(board) = boards.first() else { return Ok(()) };
//!
//!     // Connect and configure the environment demo
//!     manager.connect_and_wait(&board.id).await?;
//!     let demo = manager.configure_demo(&board.id, DemoKind::Environment).await?;
//!     if let Some(environment) = demo.into_environment() {
//!         environment.poll_once().await?;
//!         println!("{:?}", environment.readings().temperature);
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod configuration;
pub mod correlator;
pub mod demo;
pub mod device;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod mock;
pub mod transport;
pub mod util;

pub use thunderboard_types::uuids;

// Core exports
pub use btle::BtleTransport;
pub use configuration::{ConfigurationPlan, NotifyAction, PlanKind};
pub use correlator::{Correlator, OperationKind};
pub use demo::{
    DemoConnection, DemoLink, EnvironmentDemoConnection, EnvironmentEvent, IoDemoConnection,
    IoEvent, MotionDemoConnection, MotionEvent,
};
pub use device::{ConnectionConfig, DeviceSnapshot, SignalQuality};
pub use error::{ConnectionFailureReason, DemoLabel, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, ManagerEvent};
pub use graph::{GraphReport, TaskCompletion, TaskGraph, TaskHandle};
pub use manager::{BleManager, ManagerConfig};
pub use mock::{MockPeripheral, MockRequest, MockTransport};
pub use transport::{PeripheralId, Transport, TransportEvent};

// Re-export from thunderboard-types
pub use thunderboard_types::{
    Capability, ConnectionState, DemoKind, DeviceModel, EnvironmentReadings, PowerSource,
    PowerState,
};
