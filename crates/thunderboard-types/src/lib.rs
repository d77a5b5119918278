//! Platform-agnostic types for Thunderboard BLE development boards.
//!
//! This crate holds everything about Thunderboard React and Sense boards
//! that does not need a radio: channel UUIDs, the capability registry,
//! payload decoding and the value types the demos report.
//!
//! # Features
//!
//! - Capability and demo types with string parsing
//! - UUID constants for services and channels
//! - Registry mapping channels to capabilities and demos to required channels
//! - Little-endian payload decoders and command encoders
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeSet;
//! use thunderboard_types::{Capability, DemoKind, registry};
//!
//! let caps = BTreeSet::from([Capability::Orientation, Capability::Revolutions]);
//! let required = registry::required_channels(DemoKind::Motion, &caps);
//! assert!(required.contains(&thunderboard_types::uuids::CSC_MEASUREMENT));
//! ```

pub mod decode;
pub mod error;
pub mod registry;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    Acceleration, BoardId, Capability, Channel, ChannelProperties, CommandResponse,
    ConnectionState, CrankRevolutions, CscMeasurement, DIGITAL_LINES, DemoKind, DeviceModel,
    DigitalInputs, EnvironmentReadings, GatedReading, HallState, LedState, MotionCommand,
    Orientation, PowerSource, PowerState, RESPONSE_OPCODE, RESPONSE_SUCCESS, RgbColor,
    WheelRevolutions,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sense_board() -> Vec<Channel> {
        vec![
            Channel::new(
                uuids::DIGITAL,
                uuids::AUTOMATION_IO_SERVICE,
                ChannelProperties::notifiable(),
            ),
            Channel::new(
                uuids::DIGITAL,
                uuids::AUTOMATION_IO_SERVICE,
                ChannelProperties::writable(),
            ),
            Channel::new(
                uuids::TEMPERATURE,
                uuids::ENVIRONMENTAL_SENSING_SERVICE,
                ChannelProperties::readable(),
            ),
            Channel::new(
                uuids::HUMIDITY,
                uuids::ENVIRONMENTAL_SENSING_SERVICE,
                ChannelProperties::readable(),
            ),
            Channel::new(
                uuids::AIR_QUALITY_CO2,
                uuids::INDOOR_AIR_QUALITY_SERVICE,
                ChannelProperties::readable(),
            ),
            Channel::new(
                uuids::POWER_SOURCE,
                uuids::POWER_MANAGEMENT_SERVICE,
                ChannelProperties::readable(),
            ),
        ]
    }

    #[test]
    fn test_coin_cell_sense_hides_air_quality() {
        let caps = registry::capabilities(&sense_board());
        assert!(caps.contains(&Capability::DigitalInput));
        assert!(caps.contains(&Capability::DigitalOutput));
        assert!(caps.contains(&Capability::AirQualityCO2));

        let power = PowerSource::resolve(Some(4), Some(80));
        let model = DeviceModel::from_model_number("BRD4166A");
        let shown = registry::environment_capabilities(&caps, power, model);

        assert!(shown.contains(&Capability::Temperature));
        assert!(shown.contains(&Capability::PowerSource));
        assert!(!shown.contains(&Capability::AirQualityCO2));
    }

    #[test]
    fn test_usb_sense_keeps_air_quality() {
        let caps = registry::capabilities(&sense_board());
        let shown = registry::environment_capabilities(
            &caps,
            PowerSource::resolve(Some(1), None),
            DeviceModel::Sense,
        );
        assert!(shown.contains(&Capability::AirQualityCO2));
    }

    #[test]
    fn test_decoded_values_feed_readings() {
        let mut readings = EnvironmentReadings::default();
        readings.temperature = decode::temperature(&[0x29, 0x09]);
        readings.co2 = GatedReading {
            enabled: true,
            value: decode::co2(&[0x90, 0x01]),
        };
        assert_eq!(readings.temperature, Some(23.45));
        assert_eq!(readings.co2.value, Some(400));
        assert_eq!(readings.humidity, None);
    }

    #[test]
    fn test_io_requires_only_digital() {
        let required = registry::required_channels(DemoKind::Io, &BTreeSet::new());
        assert_eq!(required, BTreeSet::from([uuids::DIGITAL]));
    }

    #[test]
    fn test_control_point_response_from_root() {
        let response = decode::command_response(&[RESPONSE_OPCODE, 0x01, RESPONSE_SUCCESS]).unwrap();
        assert_eq!(response.request, 0x01);
        assert!(response.is_success());
    }
}
