//! Characteristic registry: channel UUID → capability, and the channel sets
//! each demo depends on.
//!
//! Everything here is a pure function of its inputs. A device's capability
//! set is recomputed from scratch whenever its channel list changes, so the
//! same channels always yield the same capabilities regardless of the order
//! discovery reported them in.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::types::{Capability, Channel, DemoKind, DeviceModel, PowerSource};
use crate::uuid as ids;

/// Look up the capability a channel UUID provides.
///
/// Total over unknown UUIDs, which map to `None`. The digital channel maps to
/// [`Capability::DigitalInput`]; use [`capabilities_of`] to also account for
/// a writable digital output.
pub fn capability_for(uuid: &Uuid) -> Option<Capability> {
    let capability = match *uuid {
        ids::DIGITAL => Capability::DigitalInput,
        ids::RGB_LEDS => Capability::RgbOutput,
        ids::TEMPERATURE => Capability::Temperature,
        ids::HUMIDITY => Capability::Humidity,
        ids::AMBIENT_LIGHT => Capability::AmbientLight,
        ids::UV_INDEX => Capability::UvIndex,
        ids::AIR_PRESSURE => Capability::AirPressure,
        ids::SOUND_LEVEL => Capability::SoundLevel,
        ids::AIR_QUALITY_CO2 => Capability::AirQualityCO2,
        ids::AIR_QUALITY_VOC => Capability::AirQualityVOC,
        ids::HALL_STATE => Capability::HallEffectState,
        ids::HALL_FIELD_STRENGTH => Capability::HallEffectFieldStrength,
        ids::ACCELERATION_MEASUREMENT => Capability::Acceleration,
        ids::ORIENTATION_MEASUREMENT => Capability::Orientation,
        ids::COMMAND => Capability::Calibration,
        ids::CSC_MEASUREMENT => Capability::Revolutions,
        ids::BATTERY_LEVEL => Capability::BatteryLevel,
        ids::POWER_SOURCE => Capability::PowerSource,
        _ => return None,
    };
    Some(capability)
}

/// Capabilities a single channel provides, taking its properties into account.
pub fn capabilities_of(channel: &Channel) -> Vec<Capability> {
    if channel.uuid == ids::DIGITAL {
        let mut caps = Vec::with_capacity(2);
        if channel.properties.supports_notify() || !channel.properties.is_writable() {
            caps.push(Capability::DigitalInput);
        }
        if channel.properties.is_writable() {
            caps.push(Capability::DigitalOutput);
        }
        return caps;
    }
    capability_for(&channel.uuid).into_iter().collect()
}

/// The capability set of a device with the given channels.
pub fn capabilities<'a, I>(channels: I) -> BTreeSet<Capability>
where
    I: IntoIterator<Item = &'a Channel>,
{
    channels.into_iter().flat_map(capabilities_of).collect()
}

/// The minimal channel set that must be discovered before `demo` can be
/// configured on a device with `capabilities`.
pub fn required_channels(demo: DemoKind, capabilities: &BTreeSet<Capability>) -> BTreeSet<Uuid> {
    let mut required = BTreeSet::new();
    match demo {
        DemoKind::Io => {
            required.insert(ids::DIGITAL);
        }
        DemoKind::Environment => {
            required.insert(ids::TEMPERATURE);
            required.insert(ids::HUMIDITY);
        }
        DemoKind::Motion => {
            required.insert(ids::COMMAND);
            required.insert(ids::ORIENTATION_MEASUREMENT);
            required.insert(ids::ACCELERATION_MEASUREMENT);
            if capabilities.contains(&Capability::Revolutions) {
                required.insert(ids::CSC_MEASUREMENT);
                required.insert(ids::CSC_CONTROL_POINT);
            }
        }
    }
    required
}

/// Channels that must be notify-enabled while `demo` runs. Every other
/// notifiable, non-protected channel is disabled.
///
/// The environment demo polls, so it enables nothing.
pub fn notify_targets(demo: DemoKind, capabilities: &BTreeSet<Capability>) -> BTreeSet<Uuid> {
    match demo {
        DemoKind::Io => BTreeSet::from([ids::DIGITAL]),
        DemoKind::Environment => BTreeSet::new(),
        DemoKind::Motion => required_channels(DemoKind::Motion, capabilities),
    }
}

/// Channels that stay notify-enabled across every configuration and are
/// never toggled by reset or reconfigure.
pub fn is_protected(uuid: &Uuid) -> bool {
    *uuid == ids::BATTERY_LEVEL
}

/// Channels read once after discovery to fill in the device's identity.
pub const IDENTITY_CHANNELS: [Uuid; 5] = [
    ids::MODEL_NUMBER,
    ids::FIRMWARE_REVISION,
    ids::SYSTEM_IDENTIFIER,
    ids::POWER_SOURCE,
    ids::BATTERY_LEVEL,
];

/// Capabilities the environment demo is interested in.
pub const ENVIRONMENT_INTEREST: [Capability; 11] = [
    Capability::Temperature,
    Capability::Humidity,
    Capability::AmbientLight,
    Capability::UvIndex,
    Capability::AirPressure,
    Capability::SoundLevel,
    Capability::AirQualityCO2,
    Capability::AirQualityVOC,
    Capability::HallEffectState,
    Capability::HallEffectFieldStrength,
    Capability::PowerSource,
];

/// The capabilities the environment demo shows for a device.
///
/// Starts from [`ENVIRONMENT_INTEREST`] and keeps only what the device has.
/// The air quality sensor is powered down on coin-cell Sense boards, so CO2
/// and VOC are dropped there regardless of what discovery reported.
pub fn environment_capabilities(
    device_capabilities: &BTreeSet<Capability>,
    power: PowerSource,
    model: DeviceModel,
) -> BTreeSet<Capability> {
    let air_quality_off = power.is_coin_cell() && model == DeviceModel::Sense;
    ENVIRONMENT_INTEREST
        .into_iter()
        .filter(|c| device_capabilities.contains(c))
        .filter(|c| {
            !(air_quality_off
                && matches!(c, Capability::AirQualityCO2 | Capability::AirQualityVOC))
        })
        .collect()
}

/// Channel UUID backing a capability.
pub fn channel_for_capability(capability: Capability) -> Uuid {
    match capability {
        Capability::Temperature => ids::TEMPERATURE,
        Capability::Humidity => ids::HUMIDITY,
        Capability::AmbientLight => ids::AMBIENT_LIGHT,
        Capability::UvIndex => ids::UV_INDEX,
        Capability::AirPressure => ids::AIR_PRESSURE,
        Capability::SoundLevel => ids::SOUND_LEVEL,
        Capability::AirQualityCO2 => ids::AIR_QUALITY_CO2,
        Capability::AirQualityVOC => ids::AIR_QUALITY_VOC,
        Capability::HallEffectState => ids::HALL_STATE,
        Capability::HallEffectFieldStrength => ids::HALL_FIELD_STRENGTH,
        Capability::Acceleration => ids::ACCELERATION_MEASUREMENT,
        Capability::Orientation => ids::ORIENTATION_MEASUREMENT,
        Capability::Calibration => ids::COMMAND,
        Capability::Revolutions => ids::CSC_MEASUREMENT,
        Capability::BatteryLevel => ids::BATTERY_LEVEL,
        Capability::PowerSource => ids::POWER_SOURCE,
        Capability::RgbOutput => ids::RGB_LEDS,
        Capability::DigitalInput | Capability::DigitalOutput => ids::DIGITAL,
    }
}
