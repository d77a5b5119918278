//! Buttons and LEDs.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use thunderboard_types::{
    Capability, DIGITAL_LINES, DigitalInputs, LedState, RgbColor, decode, uuids,
};

use super::{DEMO_EVENT_CAPACITY, DemoLink, DemoSession};
use crate::device::Device;
use crate::error::{Error, Result};

/// Events published by an [`IoDemoConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// The button mask changed.
    Inputs(DigitalInputs),
    /// The device disconnected or the demo ended.
    Disconnected,
}

#[derive(Debug, Default)]
struct IoState {
    inputs: DigitalInputs,
    leds: LedState,
    rgb: Option<RgbColor>,
}

struct IoSession {
    link: DemoLink,
    events: broadcast::Sender<IoEvent>,
    state: Mutex<IoState>,
    has_leds: bool,
    has_rgb: bool,
}

impl IoSession {
    fn state(&self) -> std::sync::MutexGuard<'_, IoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DemoSession for IoSession {
    fn link(&self) -> &DemoLink {
        &self.link
    }

    fn on_value(&self, uuid: Uuid, value: &[u8]) {
        if uuid != uuids::DIGITAL || !self.link.is_active() {
            return;
        }
        let Some(inputs) = decode::digital_inputs(value) else {
            return;
        };
        let changed = {
            let mut state = self.state();
            let changed = state.inputs != inputs;
            state.inputs = inputs;
            changed
        };
        if changed {
            let _ = self.events.send(IoEvent::Inputs(inputs));
        }
    }

    fn invalidate(&self) {
        if self.link.deactivate() {
            debug!(device = %self.link.device(), "io demo invalidated");
            let _ = self.events.send(IoEvent::Disconnected);
        }
    }
}

/// The IO demo: button state in, LED state out.
///
/// LED writes are optimistic. The local state is updated before the write is
/// issued and every write carries the full mask, so the last write wins.
#[derive(Clone)]
pub struct IoDemoConnection {
    session: Arc<IoSession>,
}

impl IoDemoConnection {
    pub(crate) fn new(link: DemoLink, device: &Device) -> Self {
        let inputs = device
            .channels()
            .iter()
            .find(|c| c.uuid == uuids::DIGITAL && c.properties.supports_notify())
            .and_then(|c| c.value.as_deref())
            .and_then(decode::digital_inputs)
            .unwrap_or_default();
        let (events, _) = broadcast::channel(DEMO_EVENT_CAPACITY);
        Self {
            session: Arc::new(IoSession {
                link,
                events,
                state: Mutex::new(IoState {
                    inputs,
                    ..IoState::default()
                }),
                has_leds: device.capabilities().contains(&Capability::DigitalOutput),
                has_rgb: device.capabilities().contains(&Capability::RgbOutput),
            }),
        }
    }

    pub(crate) fn session(&self) -> Arc<dyn DemoSession> {
        self.session.clone()
    }

    pub(crate) fn link(&self) -> &DemoLink {
        &self.session.link
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IoEvent> {
        self.session.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.session.link.is_active()
    }

    /// Latest button mask.
    pub fn input_state(&self) -> DigitalInputs {
        self.session.state().inputs
    }

    /// LED mask as last written.
    pub fn led_state(&self) -> LedState {
        self.session.state().leds
    }

    /// RGB color as last written, `None` while the RGB LEDs are off.
    pub fn rgb_state(&self) -> Option<RgbColor> {
        self.session.state().rgb
    }

    pub fn has_rgb(&self) -> bool {
        self.session.has_rgb
    }

    /// Switch one LED.
    pub async fn set_led(&self, index: usize, on: bool) -> Result<()> {
        if index >= DIGITAL_LINES {
            return Err(Error::InvalidArgument(format!(
                "LED index {} out of range 0..{}",
                index, DIGITAL_LINES
            )));
        }
        let leds = self.led_state().with(index, on);
        self.set_leds(leds).await
    }

    /// Write the full LED mask.
    pub async fn set_leds(&self, leds: LedState) -> Result<()> {
        let session = &self.session;
        session.link.ensure_active()?;
        if !session.has_leds {
            return Err(Error::channel_not_found(uuids::DIGITAL));
        }
        session.state().leds = leds;
        session
            .link
            .write(uuids::DIGITAL, &decode::encode_leds(leds))
            .await
    }

    /// Set the RGB LEDs of a Sense board. `None` switches them off.
    pub async fn set_rgb(&self, color: Option<RgbColor>) -> Result<()> {
        let session = &self.session;
        session.link.ensure_active()?;
        if !session.has_rgb {
            return Err(Error::channel_not_found(uuids::RGB_LEDS));
        }
        session.state().rgb = color;
        let payload = decode::encode_rgb(color.is_some(), color.unwrap_or_default());
        session.link.write(uuids::RGB_LEDS, &payload).await
    }
}

impl std::fmt::Debug for IoDemoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoDemoConnection")
            .field("link", &self.session.link)
            .field("state", &*self.session.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::correlator::Correlator;
    use crate::device::ConnectionConfig;
    use crate::mock::{MockPeripheral, MockRequest, MockTransport};
    use crate::transport::{PeripheralId, Transport};
    use thunderboard_types::{Channel, ChannelProperties, DemoKind};

    fn react_device() -> Device {
        let mut device = Device::new(PeripheralId::new("react"));
        device.begin_epoch();
        let mut input = Channel::new(
            uuids::DIGITAL,
            uuids::AUTOMATION_IO_SERVICE,
            ChannelProperties::notifiable(),
        );
        input.value = Some(vec![0x01]);
        device.replace_service_channels(
            uuids::AUTOMATION_IO_SERVICE,
            vec![
                input,
                Channel::new(
                    uuids::DIGITAL,
                    uuids::AUTOMATION_IO_SERVICE,
                    ChannelProperties::writable(),
                ),
            ],
        );
        device
    }

    fn connection(transport: &MockTransport, device: &Device) -> IoDemoConnection {
        let link = DemoLink::new(
            device.id.clone(),
            device.epoch,
            DemoKind::Io,
            Arc::new(transport.clone()) as Arc<dyn Transport>,
            Arc::new(Correlator::new()),
            ConnectionConfig::default(),
        );
        IoDemoConnection::new(link, device)
    }

    #[tokio::test]
    async fn test_initial_inputs_come_from_channel_value() {
        let transport = MockTransport::new();
        let io = connection(&transport, &react_device());
        assert!(io.input_state().is_pressed(0));
        assert!(!io.has_rgb());
    }

    #[tokio::test]
    async fn test_set_led_is_optimistic_full_mask_write() {
        let transport = MockTransport::new();
        transport
            .add_peripheral(MockPeripheral::thunderboard_react("react"))
            .await;
        let io = connection(&transport, &react_device());

        io.set_led(1, true).await.unwrap();
        io.set_led(0, true).await.unwrap();
        assert!(io.led_state().is_on(0));
        assert!(io.led_state().is_on(1));

        let writes: Vec<_> = transport
            .requests()
            .await
            .into_iter()
            .filter_map(|r| match r {
                MockRequest::Write { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![vec![0x04], vec![0x05]]);
    }

    #[tokio::test]
    async fn test_set_led_rejects_out_of_range() {
        let transport = MockTransport::new();
        let io = connection(&transport, &react_device());
        assert!(matches!(
            io.set_led(DIGITAL_LINES, true).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_rgb_requires_capability() {
        let transport = MockTransport::new();
        let io = connection(&transport, &react_device());
        assert!(matches!(
            io.set_rgb(Some(RgbColor::default())).await,
            Err(Error::ChannelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_inputs_event_and_single_disconnect() {
        let transport = MockTransport::new();
        let io = connection(&transport, &react_device());
        let mut events = io.subscribe();
        let session = io.session();

        session.on_value(uuids::DIGITAL, &[0x04]);
        session.on_value(uuids::DIGITAL, &[0x04]);
        session.on_value(uuids::DIGITAL, &[]);
        assert_eq!(
            events.recv().await.unwrap(),
            IoEvent::Inputs(DigitalInputs { mask: 0x04 })
        );

        session.invalidate();
        session.invalidate();
        assert_eq!(events.recv().await.unwrap(), IoEvent::Disconnected);
        assert!(events.try_recv().is_err());

        assert!(!io.is_active());
        assert!(matches!(io.set_led(0, true).await, Err(Error::DemoDisconnected)));
    }
}
