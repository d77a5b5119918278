//! Command implementations for the CLI.

mod alias;
mod environment;
mod info;
mod io;
mod motion;
mod scan;

pub use alias::{AliasAction, cmd_alias};
pub use environment::cmd_environment;
pub use info::cmd_info;
pub use io::{LedCommand, cmd_io};
pub use motion::{MotionAction, cmd_motion};
pub use scan::cmd_scan;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use thunderboard_core::mock::{MockPeripheral, MockTransport};
    use thunderboard_core::{BleManager, ManagerConfig};

    use crate::format::FormatOptions;

    /// A started manager over a mock transport holding `peripherals`.
    pub async fn mock_manager(peripherals: Vec<MockPeripheral>) -> (BleManager, MockTransport) {
        let transport = MockTransport::new();
        for peripheral in peripherals {
            transport.add_peripheral(peripheral).await;
        }
        let manager = BleManager::new(Arc::new(transport.clone()), ManagerConfig::default());
        manager.start().await.unwrap();
        (manager, transport)
    }

    pub fn plain() -> FormatOptions {
        FormatOptions::new(true, false)
    }

    pub fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }
}
