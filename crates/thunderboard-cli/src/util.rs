//! Utility functions for CLI operations.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use thunderboard_core::{BleManager, DeviceModel, DeviceSnapshot, ManagerEvent, PeripheralId};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// How long to scan for a named board before giving up.
pub const FIND_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the identity channels after connecting.
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write `content` and flush, so streamed output shows up immediately.
pub fn write_output(out: &mut impl Write, content: &str) -> Result<()> {
    out.write_all(content.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Scan until a board matching `identifier` (ID or name) shows up.
///
/// The scan stops as soon as the board is seen.
pub async fn find_board(
    manager: &BleManager,
    identifier: &str,
    scan_timeout: Duration,
) -> Result<DeviceSnapshot> {
    if let Some(device) = manager.find_device(identifier).await {
        return Ok(device);
    }

    let mut events = manager.subscribe();
    manager
        .start_scan()
        .await
        .context("Failed to start scanning")?;

    let deadline = Instant::now() + scan_timeout;
    let found = loop {
        if let Some(device) = manager.find_device(identifier).await {
            break Some(device);
        }
        match timeout_at(deadline, events.recv()).await {
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) | Err(_) => break None,
        }
    };

    manager.stop_scan().await.context("Failed to stop scanning")?;

    match found {
        Some(device) => Ok(device),
        None => bail!(
            "Board '{}' not found within {}s.\n\
             Make sure it is powered on and in range, or run 'thunderboard scan'.",
            identifier,
            scan_timeout.as_secs()
        ),
    }
}

/// Find `identifier` and connect to it.
pub async fn connect_board(manager: &BleManager, identifier: &str) -> Result<DeviceSnapshot> {
    let device = find_board(manager, identifier, FIND_TIMEOUT).await?;
    let epoch = manager
        .connect_and_wait(&device.id)
        .await
        .with_context(|| format!("Failed to connect to {}", device.display_name()))?;
    debug!(device = %device.id, epoch, "connected");

    manager
        .device(&device.id)
        .await
        .context("Board vanished after connecting")
}

fn identity_complete(device: &DeviceSnapshot) -> bool {
    device.model != DeviceModel::Unknown && device.firmware_version.is_some()
}

/// Wait until the identity reads issued on connect have landed.
///
/// Returns the latest snapshot once the model and firmware are known or
/// `wait` has passed, whichever comes first.
pub async fn wait_for_identity(
    manager: &BleManager,
    id: &PeripheralId,
    wait: Duration,
) -> Result<DeviceSnapshot> {
    let mut events = manager.subscribe();
    let deadline = Instant::now() + wait;
    loop {
        let device = manager
            .device(id)
            .await
            .with_context(|| format!("Unknown board {}", id))?;
        if identity_complete(&device) {
            return Ok(device);
        }
        match timeout_at(deadline, events.recv()).await {
            Ok(Ok(ManagerEvent::DeviceDisconnected { device, .. })) if &device == id => {
                bail!("Board disconnected while reading its identity");
            }
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) | Err(_) => {
                debug!(device = %id, "identity incomplete, using what arrived");
                return Ok(device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use thunderboard_core::mock::{MockPeripheral, MockTransport};
    use thunderboard_core::ManagerConfig;

    async fn manager_with(peripheral: MockPeripheral) -> BleManager {
        let transport = MockTransport::new();
        transport.add_peripheral(peripheral).await;
        let manager = BleManager::new(Arc::new(transport), ManagerConfig::default());
        manager.start().await.unwrap();
        manager
    }

    #[test]
    fn test_write_output() {
        let mut out = Vec::new();
        write_output(&mut out, "hello\n").unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn test_find_board_by_name() {
        let manager = manager_with(MockPeripheral::thunderboard_react("react-1")).await;
        let device = find_board(&manager, "thunder react", FIND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(device.id, PeripheralId::new("react-1"));
        assert!(!manager.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_board_missing() {
        let manager = manager_with(MockPeripheral::thunderboard_react("react-1")).await;
        let err = find_board(&manager, "Thunder Sense", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_connect_and_identify() {
        let manager = manager_with(MockPeripheral::thunderboard_sense("sense-1")).await;
        let device = connect_board(&manager, "sense-1").await.unwrap();
        assert!(device.is_connected());

        let device = wait_for_identity(&manager, &device.id, IDENTITY_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(device.model, DeviceModel::Sense);
        assert!(device.firmware_version.is_some());
    }
}
