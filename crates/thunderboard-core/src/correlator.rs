//! Correlation of asynchronous transport completions with their requests.
//!
//! Every request that expects a confirmation registers a waiter under
//! `(peripheral, channel, operation kind)` before the request is issued.
//! Confirmations resolve waiters for the same key in registration order, so
//! two outstanding toggles on different channels can never confirm each
//! other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::PeripheralId;

/// Kind of operation awaiting a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Set-notify, confirmed by `NotifyStateChanged`.
    Notify,
    /// Write with response, confirmed by `WriteConfirmed`.
    Write,
}

/// Identifier of one registered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

type Key = (PeripheralId, Uuid, OperationKind);
type Waiter = (OperationId, oneshot::Sender<Result<()>>);

/// Map of outstanding operations awaiting confirmation.
#[derive(Debug, Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<Key, VecDeque<Waiter>>>,
}

/// A registered operation. Await [`PendingOperation::wait`] for its outcome.
#[derive(Debug)]
pub struct PendingOperation {
    pub id: OperationId,
    receiver: oneshot::Receiver<Result<()>>,
}

impl PendingOperation {
    /// Wait for the confirmation.
    ///
    /// Resolves to [`Error::Cancelled`] if the waiter was discarded without
    /// an outcome.
    pub async fn wait(self) -> Result<()> {
        self.receiver.await.unwrap_or(Err(Error::Cancelled))
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Call before issuing the request.
    pub async fn register(
        &self,
        device: &PeripheralId,
        uuid: Uuid,
        kind: OperationKind,
    ) -> PendingOperation {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .entry((device.clone(), uuid, kind))
            .or_default()
            .push_back((id, tx));
        PendingOperation { id, receiver: rx }
    }

    /// Resolve the oldest live waiter for a key. Returns false if none was
    /// waiting.
    ///
    /// Waiters whose receiver is gone (an aborted task) are discarded on the
    /// way so they never absorb a confirmation meant for a later request.
    pub async fn resolve(
        &self,
        device: &PeripheralId,
        uuid: Uuid,
        kind: OperationKind,
        outcome: Result<()>,
    ) -> bool {
        let key = (device.clone(), uuid, kind);
        let waiter = {
            let mut pending = self.pending.lock().await;
            let mut waiter = None;
            if let Some(queue) = pending.get_mut(&key) {
                while let Some((id, tx)) = queue.pop_front() {
                    if !tx.is_closed() {
                        waiter = Some((id, tx));
                        break;
                    }
                    debug!(device = %device, channel = %uuid, ?kind, ?id, "discarding abandoned waiter");
                }
            }
            if pending.get(&key).is_some_and(VecDeque::is_empty) {
                pending.remove(&key);
            }
            waiter
        };
        match waiter {
            Some((id, tx)) => {
                debug!(device = %device, channel = %uuid, ?kind, ?id, "operation confirmed");
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(device = %device, channel = %uuid, ?kind, "unsolicited confirmation");
                false
            }
        }
    }

    /// Drop a waiter that is no longer interesting (e.g. its task timed out).
    pub async fn forget(&self, device: &PeripheralId, uuid: Uuid, kind: OperationKind, id: OperationId) {
        let key = (device.clone(), uuid, kind);
        let mut pending = self.pending.lock().await;
        if let Some(queue) = pending.get_mut(&key) {
            queue.retain(|(waiting, _)| *waiting != id);
            if queue.is_empty() {
                pending.remove(&key);
            }
        }
    }

    /// Fail every waiter of a device, e.g. after it disconnected.
    pub async fn fail_device(&self, device: &PeripheralId) -> usize {
        let drained: Vec<Waiter> = {
            let mut pending = self.pending.lock().await;
            let keys: Vec<Key> = pending
                .keys()
                .filter(|(id, _, _)| id == device)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key))
                .flatten()
                .collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::NotConnected));
        }
        count
    }

    /// Number of outstanding waiters.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.values().map(VecDeque::len).sum()
    }
}
