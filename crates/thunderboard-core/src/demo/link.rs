//! Binding between a demo connection and one connection epoch of a board.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use thunderboard_types::DemoKind;

use crate::correlator::{Correlator, OperationKind};
use crate::device::ConnectionConfig;
use crate::error::{Error, Result};
use crate::transport::{PeripheralId, Transport};

/// Command path of a demo connection.
///
/// A link is valid for exactly one connection epoch. Once deactivated (by a
/// disconnect, a reset or a reconfiguration) every command fails with
/// [`Error::DemoDisconnected`].
pub struct DemoLink {
    device: PeripheralId,
    epoch: u64,
    kind: DemoKind,
    active: AtomicBool,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    config: ConnectionConfig,
}

impl DemoLink {
    pub(crate) fn new(
        device: PeripheralId,
        epoch: u64,
        kind: DemoKind,
        transport: Arc<dyn Transport>,
        correlator: Arc<Correlator>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            device,
            epoch,
            kind,
            active: AtomicBool::new(true),
            transport,
            correlator,
            config,
        }
    }

    pub fn device(&self) -> &PeripheralId {
        &self.device
    }

    /// Connection epoch this link was configured on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn kind(&self) -> DemoKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Mark the link dead. Returns true only for the call that flipped it.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::DemoDisconnected)
        }
    }

    /// Issue a write without waiting for its confirmation.
    pub async fn write(&self, uuid: Uuid, value: &[u8]) -> Result<()> {
        self.ensure_active()?;
        debug!(device = %self.device, channel = %uuid, len = value.len(), "write");
        self.transport.write_value(&self.device, uuid, value).await
    }

    /// Issue a write and wait for the board to confirm it.
    pub async fn write_confirmed(&self, uuid: Uuid, value: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let pending = self
            .correlator
            .register(&self.device, uuid, OperationKind::Write)
            .await;
        let id = pending.id;

        if let Err(e) = self.transport.write_value(&self.device, uuid, value).await {
            self.correlator
                .forget(&self.device, uuid, OperationKind::Write, id)
                .await;
            return Err(e);
        }

        match timeout(self.config.write_timeout, pending.wait()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::NotConnected)) => Err(Error::DemoDisconnected),
            Ok(Err(e)) => Err(Error::WriteFailed {
                uuid: uuid.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(device = %self.device, channel = %uuid, "write confirmation timed out");
                self.correlator
                    .forget(&self.device, uuid, OperationKind::Write, id)
                    .await;
                Err(Error::timeout("write", self.config.write_timeout))
            }
        }
    }

    /// Request a read. The value arrives later through the session.
    pub async fn read(&self, uuid: Uuid) -> Result<()> {
        self.ensure_active()?;
        self.transport.read_value(&self.device, uuid).await
    }
}

impl std::fmt::Debug for DemoLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoLink")
            .field("device", &self.device)
            .field("epoch", &self.epoch)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}
