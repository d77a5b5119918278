//! Orientation, acceleration and wheel revolutions.
//!
//! Calibration and orientation reset share one control point and the board
//! answers both with the same indication shape. The command written last is
//! recorded before the write so the indication can be attributed.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use thunderboard_types::{
    Acceleration, Capability, CscMeasurement, MotionCommand, Orientation, decode, uuids,
};

use super::{DEMO_EVENT_CAPACITY, DemoLink, DemoSession};
use crate::device::Device;
use crate::error::{Error, Result};

/// Events published by a [`MotionDemoConnection`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionEvent {
    Orientation(Orientation),
    Acceleration(Acceleration),
    /// Wheel revolutions since the last reset, with the rate since the
    /// previous sample when one is available.
    Revolutions { cumulative: u32, rpm: Option<f32> },
    CalibrationStarted,
    CalibrationFinished { success: bool },
    OrientationResetStarted,
    OrientationResetFinished { success: bool },
    RevolutionsResetStarted,
    RevolutionsResetFinished { success: bool },
    Disconnected,
}

#[derive(Debug, Default)]
struct MotionState {
    /// Command written to the command channel and not yet answered.
    pending_command: Option<MotionCommand>,
    revolutions_reset_pending: bool,
    last_csc: Option<CscMeasurement>,
    orientation: Option<Orientation>,
    acceleration: Option<Acceleration>,
}

struct MotionSession {
    link: DemoLink,
    events: broadcast::Sender<MotionEvent>,
    state: Mutex<MotionState>,
    has_revolutions: bool,
}

impl MotionSession {
    fn state(&self) -> std::sync::MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MotionEvent) {
        let _ = self.events.send(event);
    }

    fn on_command_response(&self, value: &[u8]) {
        let Some(response) = decode::command_response(value) else {
            return;
        };
        let command = self
            .state()
            .pending_command
            .take()
            .or_else(|| MotionCommand::from_opcode(response.request));
        let success = response.is_success();
        match command {
            Some(MotionCommand::Calibrate) => {
                self.emit(MotionEvent::CalibrationFinished { success })
            }
            Some(MotionCommand::ResetOrientation) => {
                self.emit(MotionEvent::OrientationResetFinished { success })
            }
            None => debug!(device = %self.link.device(), ?response, "unattributed command response"),
        }
    }

    fn on_csc_response(&self, value: &[u8]) {
        let Some(response) = decode::command_response(value) else {
            return;
        };
        let was_pending = {
            let mut state = self.state();
            state.last_csc = None;
            std::mem::take(&mut state.revolutions_reset_pending)
        };
        if was_pending {
            self.emit(MotionEvent::RevolutionsResetFinished {
                success: response.is_success(),
            });
        }
    }

    async fn send_command(&self, command: MotionCommand) -> Result<()> {
        self.link.ensure_active()?;
        let (started, finished) = match command {
            MotionCommand::Calibrate => (
                MotionEvent::CalibrationStarted,
                MotionEvent::CalibrationFinished { success: false },
            ),
            MotionCommand::ResetOrientation => (
                MotionEvent::OrientationResetStarted,
                MotionEvent::OrientationResetFinished { success: false },
            ),
        };

        self.state().pending_command = Some(command);
        self.emit(started);
        let result = self
            .link
            .write_confirmed(uuids::COMMAND, &decode::encode_motion_command(command))
            .await;
        if let Err(e) = &result {
            warn!(device = %self.link.device(), ?command, error = %e, "motion command failed");
            let mut state = self.state();
            if state.pending_command == Some(command) {
                state.pending_command = None;
            }
            drop(state);
            if !matches!(e, Error::DemoDisconnected) {
                self.emit(finished);
            }
        }
        result
    }
}

impl DemoSession for MotionSession {
    fn link(&self) -> &DemoLink {
        &self.link
    }

    fn on_value(&self, uuid: Uuid, value: &[u8]) {
        if !self.link.is_active() {
            return;
        }
        match uuid {
            uuids::ORIENTATION_MEASUREMENT => {
                if let Some(orientation) = decode::orientation(value) {
                    self.state().orientation = Some(orientation);
                    self.emit(MotionEvent::Orientation(orientation));
                }
            }
            uuids::ACCELERATION_MEASUREMENT => {
                if let Some(acceleration) = decode::acceleration(value) {
                    self.state().acceleration = Some(acceleration);
                    self.emit(MotionEvent::Acceleration(acceleration));
                }
            }
            uuids::CSC_MEASUREMENT => {
                let Some(sample) = decode::csc_measurement(value) else {
                    return;
                };
                let Some(wheel) = sample.wheel else {
                    return;
                };
                let rpm = {
                    let mut state = self.state();
                    let rpm = state.last_csc.and_then(|prev| sample.rpm_since(&prev));
                    state.last_csc = Some(sample);
                    rpm
                };
                self.emit(MotionEvent::Revolutions {
                    cumulative: wheel.cumulative,
                    rpm,
                });
            }
            uuids::COMMAND => self.on_command_response(value),
            uuids::CSC_CONTROL_POINT => self.on_csc_response(value),
            _ => {}
        }
    }

    fn invalidate(&self) {
        if self.link.deactivate() {
            debug!(device = %self.link.device(), "motion demo invalidated");
            self.emit(MotionEvent::Disconnected);
        }
    }
}

/// The motion demo.
///
/// Calibration, orientation reset and revolution reset are independent
/// multi-second operations on the board. Each emits a `*Started` event when
/// issued and a `*Finished` event when the board answers; callers that need
/// them in order sequence the calls themselves.
#[derive(Clone)]
pub struct MotionDemoConnection {
    session: Arc<MotionSession>,
}

impl MotionDemoConnection {
    pub(crate) fn new(link: DemoLink, device: &Device) -> Self {
        let (events, _) = broadcast::channel(DEMO_EVENT_CAPACITY);
        Self {
            session: Arc::new(MotionSession {
                link,
                events,
                state: Mutex::new(MotionState::default()),
                has_revolutions: device.capabilities().contains(&Capability::Revolutions),
            }),
        }
    }

    pub(crate) fn session(&self) -> Arc<dyn DemoSession> {
        self.session.clone()
    }

    pub(crate) fn link(&self) -> &DemoLink {
        &self.session.link
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MotionEvent> {
        self.session.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.session.link.is_active()
    }

    /// Whether the board reports wheel revolutions.
    pub fn has_revolutions(&self) -> bool {
        self.session.has_revolutions
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.session.state().orientation
    }

    pub fn acceleration(&self) -> Option<Acceleration> {
        self.session.state().acceleration
    }

    /// Start accelerometer calibration. Keep the board still until
    /// `CalibrationFinished` arrives.
    pub async fn start_calibration(&self) -> Result<()> {
        self.session.send_command(MotionCommand::Calibrate).await
    }

    /// Zero the orientation.
    pub async fn reset_orientation(&self) -> Result<()> {
        self.session
            .send_command(MotionCommand::ResetOrientation)
            .await
    }

    /// Reset the cumulative wheel revolution counter.
    pub async fn reset_revolutions(&self) -> Result<()> {
        let session = &self.session;
        session.link.ensure_active()?;
        if !session.has_revolutions {
            return Err(Error::channel_not_found(uuids::CSC_CONTROL_POINT));
        }

        session.state().revolutions_reset_pending = true;
        session.emit(MotionEvent::RevolutionsResetStarted);
        let result = session
            .link
            .write_confirmed(uuids::CSC_CONTROL_POINT, &decode::encode_revolution_reset())
            .await;
        if let Err(e) = &result {
            warn!(device = %session.link.device(), error = %e, "revolution reset failed");
            session.state().revolutions_reset_pending = false;
            if !matches!(e, Error::DemoDisconnected) {
                session.emit(MotionEvent::RevolutionsResetFinished { success: false });
            }
        }
        result
    }
}

impl std::fmt::Debug for MotionDemoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionDemoConnection")
            .field("link", &self.session.link)
            .field("has_revolutions", &self.session.has_revolutions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::{Correlator, OperationKind};
    use crate::device::ConnectionConfig;
    use crate::mock::MockTransport;
    use crate::transport::{PeripheralId, Transport};
    use thunderboard_types::{Channel, ChannelProperties, DemoKind};

    fn react_device() -> Device {
        let mut device = Device::new(PeripheralId::new("react"));
        device.begin_epoch();
        device.replace_service_channels(
            uuids::ACCELERATION_ORIENTATION_SERVICE,
            vec![
                Channel::new(
                    uuids::ORIENTATION_MEASUREMENT,
                    uuids::ACCELERATION_ORIENTATION_SERVICE,
                    ChannelProperties::notifiable(),
                ),
                Channel::new(
                    uuids::COMMAND,
                    uuids::ACCELERATION_ORIENTATION_SERVICE,
                    ChannelProperties::control_point(),
                ),
            ],
        );
        device.replace_service_channels(
            uuids::CSC_SERVICE,
            vec![
                Channel::new(uuids::CSC_MEASUREMENT, uuids::CSC_SERVICE, ChannelProperties::notifiable()),
                Channel::new(uuids::CSC_CONTROL_POINT, uuids::CSC_SERVICE, ChannelProperties::control_point()),
            ],
        );
        device
    }

    struct Fixture {
        motion: MotionDemoConnection,
        correlator: Arc<Correlator>,
        device: PeripheralId,
    }

    fn fixture() -> Fixture {
        let device = react_device();
        let correlator = Arc::new(Correlator::new());
        let link = DemoLink::new(
            device.id.clone(),
            device.epoch,
            DemoKind::Motion,
            Arc::new(MockTransport::new()) as Arc<dyn Transport>,
            Arc::clone(&correlator),
            ConnectionConfig::default(),
        );
        Fixture {
            motion: MotionDemoConnection::new(link, &device),
            correlator,
            device: device.id,
        }
    }

    /// Confirm the next write on `uuid` once it has been registered.
    async fn confirm_write(fixture: &Fixture, uuid: Uuid) {
        while !fixture
            .correlator
            .resolve(&fixture.device, uuid, OperationKind::Write, Ok(()))
            .await
        {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_pending_command_attributes_response() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();

        let (result, ()) = tokio::join!(
            fixture.motion.reset_orientation(),
            confirm_write(&fixture, uuids::COMMAND)
        );
        result.unwrap();
        assert_eq!(events.recv().await.unwrap(), MotionEvent::OrientationResetStarted);

        // The board echoes a calibration opcode, but the orientation reset
        // is the command in flight.
        fixture
            .motion
            .session()
            .on_value(uuids::COMMAND, &[0x10, 0x01, 0x01]);
        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::OrientationResetFinished { success: true }
        );
    }

    #[tokio::test]
    async fn test_calibration_failure_response() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();

        let (result, ()) = tokio::join!(
            fixture.motion.start_calibration(),
            confirm_write(&fixture, uuids::COMMAND)
        );
        result.unwrap();
        fixture
            .motion
            .session()
            .on_value(uuids::COMMAND, &[0x10, 0x01, 0x02]);

        assert_eq!(events.recv().await.unwrap(), MotionEvent::CalibrationStarted);
        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::CalibrationFinished { success: false }
        );
    }

    #[tokio::test]
    async fn test_revolution_reset_round_trip() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();
        assert!(fixture.motion.has_revolutions());

        let (result, ()) = tokio::join!(
            fixture.motion.reset_revolutions(),
            confirm_write(&fixture, uuids::CSC_CONTROL_POINT)
        );
        result.unwrap();
        fixture
            .motion
            .session()
            .on_value(uuids::CSC_CONTROL_POINT, &[0x10, 0x01, 0x01]);

        assert_eq!(events.recv().await.unwrap(), MotionEvent::RevolutionsResetStarted);
        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::RevolutionsResetFinished { success: true }
        );
    }

    #[tokio::test]
    async fn test_revolutions_rpm_from_consecutive_samples() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();
        let session = fixture.motion.session();

        let sample = |revs: u32, time: u16| {
            let mut payload = vec![0x01];
            payload.extend_from_slice(&revs.to_le_bytes());
            payload.extend_from_slice(&time.to_le_bytes());
            payload
        };
        session.on_value(uuids::CSC_MEASUREMENT, &sample(10, 0));
        session.on_value(uuids::CSC_MEASUREMENT, &sample(12, 1024));

        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::Revolutions { cumulative: 10, rpm: None }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::Revolutions { cumulative: 12, rpm: Some(120.0) }
        );
    }

    #[tokio::test]
    async fn test_orientation_event() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();
        let mut payload = Vec::new();
        for v in [150i16, -200, 0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        fixture
            .motion
            .session()
            .on_value(uuids::ORIENTATION_MEASUREMENT, &payload);

        let expected = Orientation { x: 1.5, y: -2.0, z: 0.0 };
        assert_eq!(events.recv().await.unwrap(), MotionEvent::Orientation(expected));
        assert_eq!(fixture.motion.orientation(), Some(expected));
    }

    #[tokio::test]
    async fn test_invalidated_demo_rejects_commands() {
        let fixture = fixture();
        let mut events = fixture.motion.subscribe();
        let session = fixture.motion.session();

        session.invalidate();
        session.invalidate();
        assert_eq!(events.recv().await.unwrap(), MotionEvent::Disconnected);
        assert!(events.try_recv().is_err());

        assert!(matches!(
            fixture.motion.start_calibration().await,
            Err(Error::DemoDisconnected)
        ));
        assert!(matches!(
            fixture.motion.reset_revolutions().await,
            Err(Error::DemoDisconnected)
        ));
        assert!(events.try_recv().is_err());
    }
}
