//! Demo connections handed out by a successful configuration.
//!
//! Each demo connection exposes a broadcast subscription of translated
//! domain events, command methods that map onto channel writes, and a single
//! `Disconnected` event when the connection it was configured on ends.
//!
//! The manager keeps a [`DemoSession`] handle for every live connection and
//! routes incoming channel values to it from its event pump.

mod environment;
mod io;
mod link;
mod motion;

use std::sync::Arc;

use uuid::Uuid;

use thunderboard_types::DemoKind;

use crate::device::Device;
use crate::error::Error;
use crate::transport::PeripheralId;

pub use environment::{EnvironmentDemoConnection, EnvironmentEvent};
pub use io::{IoDemoConnection, IoEvent};
pub use link::DemoLink;
pub use motion::{MotionDemoConnection, MotionEvent};

/// Capacity of each demo's event channel.
const DEMO_EVENT_CAPACITY: usize = 64;

/// Manager-side handle of a live demo connection.
pub(crate) trait DemoSession: Send + Sync {
    fn link(&self) -> &DemoLink;

    /// A value arrived on `uuid` (read completion or notification).
    fn on_value(&self, uuid: Uuid, value: &[u8]);

    /// A read issued on `uuid` came back with an error.
    fn on_read_failed(&self, _uuid: Uuid, _error: &Error) {}

    /// End the session. Emits `Disconnected` once; later calls do nothing.
    fn invalidate(&self);
}

/// The connection produced by configuring a board for one demo.
#[derive(Debug, Clone)]
pub enum DemoConnection {
    Io(IoDemoConnection),
    Environment(EnvironmentDemoConnection),
    Motion(MotionDemoConnection),
}

impl DemoConnection {
    /// Build the connection for `link`'s demo from the device's current state.
    pub(crate) fn build(link: DemoLink, device: &Device) -> Self {
        match link.kind() {
            DemoKind::Io => Self::Io(IoDemoConnection::new(link, device)),
            DemoKind::Environment => {
                Self::Environment(EnvironmentDemoConnection::new(link, device))
            }
            DemoKind::Motion => Self::Motion(MotionDemoConnection::new(link, device)),
        }
    }

    pub(crate) fn session(&self) -> Arc<dyn DemoSession> {
        match self {
            Self::Io(c) => c.session(),
            Self::Environment(c) => c.session(),
            Self::Motion(c) => c.session(),
        }
    }

    fn link(&self) -> &DemoLink {
        match self {
            Self::Io(c) => c.link(),
            Self::Environment(c) => c.link(),
            Self::Motion(c) => c.link(),
        }
    }

    pub fn kind(&self) -> DemoKind {
        self.link().kind()
    }

    pub fn device(&self) -> &PeripheralId {
        self.link().device()
    }

    /// Connection epoch the demo was configured on.
    pub fn epoch(&self) -> u64 {
        self.link().epoch()
    }

    /// False once the device disconnected or the demo was reset.
    pub fn is_active(&self) -> bool {
        self.link().is_active()
    }

    pub fn into_io(self) -> Option<IoDemoConnection> {
        match self {
            Self::Io(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_environment(self) -> Option<EnvironmentDemoConnection> {
        match self {
            Self::Environment(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_motion(self) -> Option<MotionDemoConnection> {
        match self {
            Self::Motion(c) => Some(c),
            _ => None,
        }
    }
}
