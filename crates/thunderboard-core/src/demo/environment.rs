//! Polled environmental sensors.
//!
//! The environment demo never relies on notifications. A poll loop issues a
//! read for every capability channel on a fixed period and the replies are
//! folded into one [`EnvironmentReadings`] value.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use thunderboard_types::{
    Capability, EnvironmentReadings, GatedReading, decode, registry, uuids,
};

use super::{DEMO_EVENT_CAPACITY, DemoLink, DemoSession};
use crate::device::Device;
use crate::error::{Error, Result};

/// Events published by an [`EnvironmentDemoConnection`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentEvent {
    /// A reading changed. Carries the full set.
    Updated(EnvironmentReadings),
    /// A sensor read failed. The previous reading is kept.
    ReadFailed { channel: Uuid, reason: String },
    Disconnected,
}

struct EnvironmentSession {
    link: DemoLink,
    events: broadcast::Sender<EnvironmentEvent>,
    capabilities: BTreeSet<Capability>,
    readings: Mutex<EnvironmentReadings>,
    poller: Mutex<Option<CancellationToken>>,
}

impl EnvironmentSession {
    fn readings(&self) -> std::sync::MutexGuard<'_, EnvironmentReadings> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poller(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_once(&self) -> Result<()> {
        self.link.ensure_active()?;
        for capability in &self.capabilities {
            self.link
                .read(registry::channel_for_capability(*capability))
                .await?;
        }
        Ok(())
    }
}

/// Fold one value into `readings`. Returns true if a field changed.
///
/// A payload that fails to decode clears the field, the same as a sensor
/// that has not reported yet.
fn apply(readings: &mut EnvironmentReadings, uuid: Uuid, value: &[u8]) -> bool {
    fn set<T: PartialEq>(field: &mut Option<T>, value: Option<T>) -> bool {
        let changed = *field != value;
        *field = value;
        changed
    }

    fn set_gated(field: &mut GatedReading, value: Option<u16>) -> bool {
        if !field.enabled {
            return false;
        }
        set(&mut field.value, value)
    }

    match uuid {
        uuids::TEMPERATURE => set(&mut readings.temperature, decode::temperature(value)),
        uuids::HUMIDITY => set(&mut readings.humidity, decode::humidity(value)),
        uuids::UV_INDEX => set(&mut readings.uv_index, decode::uv_index(value)),
        uuids::AMBIENT_LIGHT => set(&mut readings.ambient_light, decode::ambient_light(value)),
        uuids::AIR_PRESSURE => set(&mut readings.pressure, decode::air_pressure(value)),
        uuids::SOUND_LEVEL => set(&mut readings.sound_level, decode::sound_level(value)),
        uuids::AIR_QUALITY_CO2 => set_gated(&mut readings.co2, decode::co2(value)),
        uuids::AIR_QUALITY_VOC => set_gated(&mut readings.voc, decode::voc(value)),
        uuids::HALL_STATE => set(&mut readings.hall_state, decode::hall_state(value)),
        uuids::HALL_FIELD_STRENGTH => set(
            &mut readings.hall_field_strength,
            decode::hall_field_strength(value),
        ),
        _ => false,
    }
}

impl DemoSession for EnvironmentSession {
    fn link(&self) -> &DemoLink {
        &self.link
    }

    fn on_value(&self, uuid: Uuid, value: &[u8]) {
        if !self.link.is_active() {
            return;
        }
        let snapshot = {
            let mut readings = self.readings();
            if !apply(&mut readings, uuid, value) {
                return;
            }
            readings.captured_at = Some(OffsetDateTime::now_utc());
            readings.clone()
        };
        let _ = self.events.send(EnvironmentEvent::Updated(snapshot));
    }

    fn on_read_failed(&self, uuid: Uuid, error: &Error) {
        if !self.link.is_active() {
            return;
        }
        let _ = self.events.send(EnvironmentEvent::ReadFailed {
            channel: uuid,
            reason: error.to_string(),
        });
    }

    fn invalidate(&self) {
        if let Some(token) = self.poller().take() {
            token.cancel();
        }
        if self.link.deactivate() {
            debug!(device = %self.link.device(), "environment demo invalidated");
            let _ = self.events.send(EnvironmentEvent::Disconnected);
        }
    }
}

/// The environment demo.
#[derive(Clone)]
pub struct EnvironmentDemoConnection {
    session: Arc<EnvironmentSession>,
}

impl EnvironmentDemoConnection {
    pub(crate) fn new(link: DemoLink, device: &Device) -> Self {
        let capabilities = registry::environment_capabilities(
            device.capabilities(),
            device.power_source,
            device.model,
        );
        let readings = EnvironmentReadings {
            co2: GatedReading {
                enabled: capabilities.contains(&Capability::AirQualityCO2),
                value: None,
            },
            voc: GatedReading {
                enabled: capabilities.contains(&Capability::AirQualityVOC),
                value: None,
            },
            ..EnvironmentReadings::default()
        };
        let (events, _) = broadcast::channel(DEMO_EVENT_CAPACITY);
        Self {
            session: Arc::new(EnvironmentSession {
                link,
                events,
                capabilities,
                readings: Mutex::new(readings),
                poller: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn session(&self) -> Arc<dyn DemoSession> {
        self.session.clone()
    }

    pub(crate) fn link(&self) -> &DemoLink {
        &self.session.link
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnvironmentEvent> {
        self.session.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.session.link.is_active()
    }

    /// Capabilities shown by this demo.
    ///
    /// Only what the board reports, and without CO2 and VOC on a coin-cell
    /// Sense board whose air quality sensor is powered down.
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.session.capabilities
    }

    /// Latest readings.
    pub fn readings(&self) -> EnvironmentReadings {
        self.session.readings().clone()
    }

    /// Issue one read for every capability channel.
    pub async fn poll_once(&self) -> Result<()> {
        self.session.poll_once().await
    }

    pub fn is_polling(&self) -> bool {
        self.session.poller().is_some()
    }

    /// Start the poll loop. Does nothing if it is already running.
    pub fn start_polling(&self) -> Result<()> {
        self.session.link.ensure_active()?;
        let token = {
            let mut poller = self.session.poller();
            if poller.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *poller = Some(token.clone());
            token
        };

        let session = Arc::clone(&self.session);
        let period = session.link.config().environment_poll_interval;
        info!(device = %session.link.device(), ?period, "environment polling started");
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match session.poll_once().await {
                            Ok(()) => {}
                            Err(Error::DemoDisconnected) => break,
                            Err(e) => warn!(device = %session.link.device(), error = %e, "environment poll failed"),
                        }
                    }
                }
            }
            debug!(device = %session.link.device(), "environment polling stopped");
        });
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(token) = self.session.poller().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for EnvironmentDemoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentDemoConnection")
            .field("link", &self.session.link)
            .field("capabilities", &self.session.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::correlator::Correlator;
    use crate::device::ConnectionConfig;
    use crate::mock::{MockRequest, MockTransport};
    use crate::transport::{PeripheralId, Transport};
    use thunderboard_types::{Channel, ChannelProperties, DemoKind, DeviceModel, PowerSource};

    fn sense_device(power: &[u8]) -> Device {
        let mut device = Device::new(PeripheralId::new("sense"));
        device.begin_epoch();
        let readable = |uuid, service| Channel::new(uuid, service, ChannelProperties::readable());
        device.replace_service_channels(
            uuids::ENVIRONMENTAL_SENSING_SERVICE,
            vec![
                readable(uuids::TEMPERATURE, uuids::ENVIRONMENTAL_SENSING_SERVICE),
                readable(uuids::HUMIDITY, uuids::ENVIRONMENTAL_SENSING_SERVICE),
            ],
        );
        device.replace_service_channels(
            uuids::INDOOR_AIR_QUALITY_SERVICE,
            vec![
                readable(uuids::AIR_QUALITY_CO2, uuids::INDOOR_AIR_QUALITY_SERVICE),
                readable(uuids::AIR_QUALITY_VOC, uuids::INDOOR_AIR_QUALITY_SERVICE),
            ],
        );
        device.apply_value(uuids::MODEL_NUMBER, b"BRD4166A");
        device.apply_value(uuids::POWER_SOURCE, power);
        device
    }

    fn connection(transport: &MockTransport, device: &Device, config: ConnectionConfig) -> EnvironmentDemoConnection {
        let link = DemoLink::new(
            device.id.clone(),
            device.epoch,
            DemoKind::Environment,
            Arc::new(transport.clone()) as Arc<dyn Transport>,
            Arc::new(Correlator::new()),
            config,
        );
        EnvironmentDemoConnection::new(link, device)
    }

    #[tokio::test]
    async fn test_coin_cell_sense_hides_air_quality() {
        let device = sense_device(&[4]);
        assert_eq!(device.model, DeviceModel::Sense);
        assert!(matches!(device.power_source, PowerSource::CoinCell { .. }));

        let env = connection(&MockTransport::new(), &device, ConnectionConfig::default());
        assert!(!env.capabilities().contains(&Capability::AirQualityCO2));
        assert!(!env.capabilities().contains(&Capability::AirQualityVOC));
        assert!(env.capabilities().contains(&Capability::Temperature));
        assert!(!env.readings().co2.enabled);

        env.session().on_value(uuids::AIR_QUALITY_CO2, &600u16.to_le_bytes());
        assert_eq!(env.readings().co2.value, None);
    }

    #[tokio::test]
    async fn test_usb_sense_keeps_air_quality() {
        let env = connection(&MockTransport::new(), &sense_device(&[1]), ConnectionConfig::default());
        assert!(env.capabilities().contains(&Capability::AirQualityCO2));

        let mut events = env.subscribe();
        env.session().on_value(uuids::AIR_QUALITY_CO2, &600u16.to_le_bytes());
        match events.recv().await.unwrap() {
            EnvironmentEvent::Updated(readings) => {
                assert_eq!(readings.co2, GatedReading { enabled: true, value: Some(600) });
                assert!(readings.captured_at.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_value_reads_as_absent() {
        let env = connection(&MockTransport::new(), &sense_device(&[1]), ConnectionConfig::default());
        let session = env.session();
        session.on_value(uuids::TEMPERATURE, &2150i16.to_le_bytes());
        assert_eq!(env.readings().temperature, Some(21.5));
        session.on_value(uuids::TEMPERATURE, &[0x01]);
        assert_eq!(env.readings().temperature, None);
    }

    #[tokio::test]
    async fn test_poll_once_reads_every_capability() {
        let transport = MockTransport::new();
        let env = connection(&transport, &sense_device(&[1]), ConnectionConfig::default());
        env.poll_once().await.unwrap();

        let reads: BTreeSet<Uuid> = transport
            .requests()
            .await
            .into_iter()
            .filter_map(|r| match r {
                MockRequest::Read { uuid, .. } => Some(uuid),
                _ => None,
            })
            .collect();
        let expected: BTreeSet<Uuid> = env
            .capabilities()
            .iter()
            .map(|c| registry::channel_for_capability(*c))
            .collect();
        assert_eq!(reads, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_runs_until_invalidated() {
        let transport = MockTransport::new();
        let config = ConnectionConfig::default().environment_poll_interval(Duration::from_secs(3));
        let env = connection(&transport, &sense_device(&[1]), config);
        let per_poll = env.capabilities().len();
        let mut events = env.subscribe();

        env.start_polling().unwrap();
        env.start_polling().unwrap();
        assert!(env.is_polling());

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        let reads = transport.requests().await.len();
        assert_eq!(reads, per_poll * 3);

        env.session().invalidate();
        assert!(!env.is_polling());
        assert_eq!(events.recv().await.unwrap(), EnvironmentEvent::Disconnected);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.requests().await.len(), reads);
        assert!(matches!(env.poll_once().await, Err(Error::DemoDisconnected)));
    }
}
