//! Demo configuration plans and the task graphs that execute them.
//!
//! A [`ConfigurationPlan`] says, for every channel of a board, whether its
//! notifications must be enabled, disabled or left alone. Executing a plan
//! runs two task graphs:
//!
//! 1. `prepare`: `starting`, then `wait-required` until every channel the
//!    demo needs has been discovered (demo plans only).
//! 2. `notify`: one `notify:<uuid>` task per toggled channel, each waiting for
//!    the board to confirm, then `finished`, which builds the demo connection.
//!
//! The notify tasks can only be planned once discovery is complete, which is
//! why the work is split in two graphs.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use thunderboard_types::{Capability, Channel, ConnectionState, DemoKind, registry};

use crate::correlator::OperationKind;
use crate::demo::{DemoConnection, DemoLink};
use crate::device::Device;
use crate::error::{DemoLabel, Error, Result};
use crate::events::ManagerEvent;
use crate::graph::{GraphReport, TaskCompletion, TaskGraph};
use crate::manager::Shared;
use crate::transport::PeripheralId;

/// What a plan configures the board for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Demo(DemoKind),
    /// Quiesce the board: every toggleable channel stops notifying.
    Reset,
}

/// Decision for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    Enable,
    Disable,
    /// Not toggled: the channel cannot notify or is protected.
    Skip,
}

/// Declarative description of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationPlan {
    kind: PlanKind,
    wait_for_required: bool,
}

impl ConfigurationPlan {
    /// Plan for configuring `kind`.
    pub fn for_demo(kind: DemoKind) -> Self {
        Self {
            kind: PlanKind::Demo(kind),
            wait_for_required: true,
        }
    }

    /// Plan for resetting a board to no demo.
    pub fn reset() -> Self {
        Self {
            kind: PlanKind::Reset,
            wait_for_required: false,
        }
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn label(&self) -> DemoLabel {
        match self.kind {
            PlanKind::Demo(kind) => DemoLabel::Demo(kind),
            PlanKind::Reset => DemoLabel::Reset,
        }
    }

    /// Whether the plan waits for the demo's required channels.
    pub fn waits_for_required(&self) -> bool {
        self.wait_for_required
    }

    /// Channels that must be discovered before the plan can toggle anything.
    pub fn required_channels(&self, capabilities: &BTreeSet<Capability>) -> BTreeSet<Uuid> {
        match self.kind {
            PlanKind::Demo(kind) if self.wait_for_required => {
                registry::required_channels(kind, capabilities)
            }
            _ => BTreeSet::new(),
        }
    }

    /// Decide what happens to `channel`'s notifications.
    ///
    /// ```
    /// use std::collections::BTreeSet;
    /// use thunderboard_core::{ConfigurationPlan, NotifyAction};
    /// use thunderboard_types::{Channel, ChannelProperties, DemoKind, uuids};
    ///
    /// let digital = Channel::new(uuids::DIGITAL, uuids::AUTOMATION_IO_SERVICE, ChannelProperties::notifiable());
    /// let caps = BTreeSet::new();
    /// assert_eq!(ConfigurationPlan::for_demo(DemoKind::Io).action_for(&digital, &caps), NotifyAction::Enable);
    /// assert_eq!(ConfigurationPlan::for_demo(DemoKind::Motion).action_for(&digital, &caps), NotifyAction::Disable);
    /// ```
    pub fn action_for(&self, channel: &Channel, capabilities: &BTreeSet<Capability>) -> NotifyAction {
        if registry::is_protected(&channel.uuid) || !channel.properties.supports_notify() {
            return NotifyAction::Skip;
        }
        match self.kind {
            PlanKind::Reset | PlanKind::Demo(DemoKind::Environment) => NotifyAction::Disable,
            PlanKind::Demo(kind) => {
                if registry::notify_targets(kind, capabilities).contains(&channel.uuid) {
                    NotifyAction::Enable
                } else {
                    NotifyAction::Disable
                }
            }
        }
    }

    /// Every toggle the plan issues, one per channel UUID, in channel order.
    pub fn notify_actions(
        &self,
        channels: &[Channel],
        capabilities: &BTreeSet<Capability>,
    ) -> Vec<(Uuid, bool)> {
        let mut seen = BTreeSet::new();
        channels
            .iter()
            .filter_map(|channel| match self.action_for(channel, capabilities) {
                NotifyAction::Enable => Some((channel.uuid, true)),
                NotifyAction::Disable => Some((channel.uuid, false)),
                NotifyAction::Skip => None,
            })
            .filter(|(uuid, _)| seen.insert(*uuid))
            .collect()
    }

    /// Run the plan against `device` on connection `epoch`.
    ///
    /// A demo plan yields the demo connection; it exists only if every task
    /// succeeded.
    pub(crate) async fn execute(
        self,
        shared: Arc<Shared>,
        device: PeripheralId,
        epoch: u64,
    ) -> Result<Configured> {
        let config = &shared.config.connection;
        let label = self.label();

        let mut prepare = TaskGraph::new(format!("{}:prepare", label))
            .task_timeout(config.configuration_task_timeout);
        let starting = prepare.create_task("starting", &[], {
            let shared = Arc::clone(&shared);
            let device = device.clone();
            let kind = self.kind;
            move |done: TaskCompletion| -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    if let PlanKind::Demo(demo) = kind {
                        shared
                            .events
                            .send(ManagerEvent::ConfigurationStarted { device, demo });
                    }
                    done.complete();
                })
            }
        });
        if self.wait_for_required {
            let shared = Arc::clone(&shared);
            let device = device.clone();
            let plan = self;
            prepare.create_task_with_timeout(
                "wait-required",
                &[starting],
                config.required_channels_timeout,
                move |done: TaskCompletion| -> BoxFuture<'static, ()> {
                    Box::pin(async move {
                        done.finish(wait_for_required(&shared, &device, epoch, plan).await);
                    })
                },
            );
        }
        let mut report = prepare.run().await?;

        let actions = {
            let devices = shared.devices.read().await;
            let current = current_device(&devices, &device, epoch)?;
            self.notify_actions(current.channels(), current.capabilities())
        };
        debug!(device = %device, plan = %label, toggles = actions.len(), "planned notify toggles");

        let mut notify = TaskGraph::new(format!("{}:notify", label))
            .task_timeout(config.configuration_task_timeout);
        let mut toggles = Vec::with_capacity(actions.len());
        for (uuid, enabled) in actions {
            let shared = Arc::clone(&shared);
            let device = device.clone();
            toggles.push(notify.create_task(
                format!("notify:{}", uuid),
                &[],
                move |done: TaskCompletion| -> BoxFuture<'static, ()> {
                    Box::pin(async move {
                        done.finish(toggle_notify(&shared, &device, uuid, enabled).await);
                    })
                },
            ));
        }

        let (sender, mut receiver) = oneshot::channel();
        {
            let shared = Arc::clone(&shared);
            let device = device.clone();
            let kind = self.kind;
            notify.create_task(
                "finished",
                &toggles,
                move |done: TaskCompletion| -> BoxFuture<'static, ()> {
                    Box::pin(async move {
                        done.finish(finish(&shared, &device, epoch, kind, sender).await);
                    })
                },
            );
        }
        let notify_report = notify.run().await?;

        report.name = label.to_string();
        report.completed.extend(notify_report.completed);
        report.elapsed += notify_report.elapsed;
        info!(
            device = %device,
            plan = %label,
            tasks = report.completed.len(),
            elapsed = ?report.elapsed,
            "configuration finished"
        );

        Ok(Configured {
            report,
            connection: receiver.try_recv().ok(),
        })
    }
}

/// Result of a successfully executed plan.
pub(crate) struct Configured {
    pub report: GraphReport,
    pub connection: Option<DemoConnection>,
}

fn current_device<'a>(
    devices: &'a std::collections::HashMap<PeripheralId, Device>,
    id: &PeripheralId,
    epoch: u64,
) -> Result<&'a Device> {
    match devices.get(id) {
        Some(device) if device.epoch == epoch && device.state == ConnectionState::Connected => {
            Ok(device)
        }
        Some(_) => Err(Error::NotConnected),
        None => Err(Error::device_not_found(id.as_str())),
    }
}

/// Wait until the plan's required channels are present.
///
/// Wakes on every discovery completion and on a fixed recheck interval, and
/// fails as soon as the device leaves the connection epoch.
async fn wait_for_required(
    shared: &Shared,
    device: &PeripheralId,
    epoch: u64,
    plan: ConfigurationPlan,
) -> Result<()> {
    let recheck = shared.config.connection.required_channels_recheck;
    loop {
        let changed = shared.channels_changed.notified();
        {
            let devices = shared.devices.read().await;
            let current = current_device(&devices, device, epoch)?;
            let required = plan.required_channels(current.capabilities());
            if current.has_channels(&required) {
                debug!(device = %device, channels = required.len(), "required channels present");
                return Ok(());
            }
        }
        tokio::select! {
            _ = changed => {}
            _ = sleep(recheck) => {}
        }
    }
}

/// Toggle notifications on one channel and wait for the board to confirm.
async fn toggle_notify(
    shared: &Shared,
    device: &PeripheralId,
    uuid: Uuid,
    enabled: bool,
) -> Result<()> {
    let pending = shared
        .correlator
        .register(device, uuid, OperationKind::Notify)
        .await;
    let id = pending.id;
    if let Err(e) = shared.transport.set_notify(device, uuid, enabled).await {
        shared
            .correlator
            .forget(device, uuid, OperationKind::Notify, id)
            .await;
        return Err(e);
    }
    pending.wait().await.map_err(|e| match e {
        Error::NotifyFailed { .. } | Error::NotConnected => e,
        other => Error::NotifyFailed {
            uuid: uuid.to_string(),
            reason: other.to_string(),
        },
    })
}

/// Bind the result of the plan to the device.
async fn finish(
    shared: &Arc<Shared>,
    device: &PeripheralId,
    epoch: u64,
    kind: PlanKind,
    sender: oneshot::Sender<DemoConnection>,
) -> Result<()> {
    let mut devices = shared.devices.write().await;
    current_device(&devices, device, epoch)?;
    let Some(current) = devices.get_mut(device) else {
        return Err(Error::device_not_found(device.as_str()));
    };

    match kind {
        PlanKind::Demo(demo) => {
            if sender.is_closed() {
                return Err(Error::Cancelled);
            }
            let link = DemoLink::new(
                device.clone(),
                epoch,
                demo,
                Arc::clone(&shared.transport),
                Arc::clone(&shared.correlator),
                shared.config.connection.clone(),
            );
            let connection = DemoConnection::build(link, current);
            current.sessions.push(connection.session());
            current.demo = Some(demo);
            sender.send(connection).map_err(|_| Error::Cancelled)?;
        }
        PlanKind::Reset => current.demo = None,
    }
    Ok(())
}
