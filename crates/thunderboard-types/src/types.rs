//! Core types for Thunderboard boards and their sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// A semantic feature of a board, resolved from its discovered channels.
///
/// Capabilities are ordered so that a device's capability set can live in a
/// `BTreeSet` and compare equal regardless of discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum Capability {
    /// Push buttons / switches.
    DigitalInput,
    /// Single-color LEDs.
    DigitalOutput,
    /// RGB LEDs (Sense).
    RgbOutput,
    Temperature,
    Humidity,
    AmbientLight,
    UvIndex,
    AirPressure,
    SoundLevel,
    /// Equivalent CO2 from the air quality sensor.
    AirQualityCO2,
    /// Total volatile organic compounds from the air quality sensor.
    AirQualityVOC,
    HallEffectState,
    HallEffectFieldStrength,
    Acceleration,
    Orientation,
    /// Motion sensor calibration and orientation reset commands.
    Calibration,
    /// Wheel revolution counter (CSC profile).
    Revolutions,
    BatteryLevel,
    PowerSource,
}

impl Capability {
    /// All capabilities, in declaration order.
    pub const ALL: [Capability; 19] = [
        Capability::DigitalInput,
        Capability::DigitalOutput,
        Capability::RgbOutput,
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
        Capability::Acceleration,
        Capability::Orientation,
        Capability::Calibration,
        Capability::Revolutions,
        Capability::BatteryLevel,
        Capability::PowerSource,
    ];

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DigitalInput => "digital_input",
            Capability::DigitalOutput => "digital_output",
            Capability::RgbOutput => "rgb_output",
            Capability::Temperature => "temperature",
            Capability::Humidity => "humidity",
            Capability::AmbientLight => "ambient_light",
            Capability::UvIndex => "uv_index",
            Capability::AirPressure => "air_pressure",
            Capability::SoundLevel => "sound_level",
            Capability::AirQualityCO2 => "air_quality_co2",
            Capability::AirQualityVOC => "air_quality_voc",
            Capability::HallEffectState => "hall_effect_state",
            Capability::HallEffectFieldStrength => "hall_effect_field_strength",
            Capability::Acceleration => "acceleration",
            Capability::Orientation => "orientation",
            Capability::Calibration => "calibration",
            Capability::Revolutions => "revolutions",
            Capability::BatteryLevel => "battery_level",
            Capability::PowerSource => "power_source",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace('-', "_");
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| ParseError::UnknownCapability(s.to_string()))
    }
}

/// The three interactive demo modes a board can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DemoKind {
    /// Buttons and LEDs.
    Io,
    /// Polled environmental sensors.
    Environment,
    /// Orientation, acceleration and revolutions.
    Motion,
}

impl DemoKind {
    /// All demo kinds.
    pub const ALL: [DemoKind; 3] = [DemoKind::Io, DemoKind::Environment, DemoKind::Motion];
}

impl fmt::Display for DemoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemoKind::Io => write!(f, "io"),
            DemoKind::Environment => write!(f, "environment"),
            DemoKind::Motion => write!(f, "motion"),
        }
    }
}

impl FromStr for DemoKind {
    type Err = ParseError;

    /// Parse a demo name (case-insensitive).
    ///
    /// ```
    /// use thunderboard_types::DemoKind;
    ///
    /// assert_eq!("io".parse::<DemoKind>(), Ok(DemoKind::Io));
    /// assert_eq!("Env".parse::<DemoKind>(), Ok(DemoKind::Environment));
    /// assert!("lights".parse::<DemoKind>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "io" => Ok(DemoKind::Io),
            "environment" | "env" => Ok(DemoKind::Environment),
            "motion" => Ok(DemoKind::Motion),
            _ => Err(ParseError::UnknownDemo(s.to_string())),
        }
    }
}

/// Operations a channel supports, as reported by service discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl ChannelProperties {
    /// Read-only channel.
    pub const fn readable() -> Self {
        Self {
            read: true,
            write: false,
            write_without_response: false,
            notify: false,
            indicate: false,
        }
    }

    /// Readable channel that can also push notifications.
    pub const fn notifiable() -> Self {
        Self {
            notify: true,
            ..Self::readable()
        }
    }

    /// Writable channel that confirms through indications (control points).
    pub const fn control_point() -> Self {
        Self {
            read: false,
            write: true,
            write_without_response: false,
            notify: false,
            indicate: true,
        }
    }

    /// Writable channel without push support.
    pub const fn writable() -> Self {
        Self {
            read: true,
            write: true,
            write_without_response: false,
            notify: false,
            indicate: false,
        }
    }

    /// Whether the peripheral can push values (notify or indicate).
    pub fn supports_notify(&self) -> bool {
        self.notify || self.indicate
    }

    /// Whether the channel accepts writes of either kind.
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A data endpoint exposed by a connected board.
///
/// Channels are enumerated fresh after each connection and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Channel {
    /// Channel UUID. Not unique on its own: the digital input and output
    /// share a UUID and differ in properties.
    pub uuid: Uuid,
    /// UUID of the service the channel belongs to.
    pub service: Uuid,
    /// Supported operations.
    pub properties: ChannelProperties,
    /// Last value received from the transport, if any.
    pub value: Option<Vec<u8>>,
}

impl Channel {
    /// Create a channel with no value yet.
    pub fn new(uuid: Uuid, service: Uuid, properties: ChannelProperties) -> Self {
        Self {
            uuid,
            service,
            properties,
            value: None,
        }
    }
}

/// How the board is powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum PowerSource {
    #[default]
    Unknown,
    Usb,
    /// AA battery pack.
    Aa { level: Option<u8> },
    /// CR2032 coin cell.
    CoinCell { level: Option<u8> },
    /// Battery of unreported type (React boards, AAA packs).
    GenericBattery { level: Option<u8> },
}

impl PowerSource {
    /// Combine the raw power-source byte and the battery level into one value.
    ///
    /// `source` is the Power Source channel byte (absent on React boards);
    /// `level` is the Battery Level percentage.
    ///
    /// ```
    /// use thunderboard_types::PowerSource;
    ///
    /// assert_eq!(PowerSource::resolve(Some(1), Some(80)), PowerSource::Usb);
    /// assert_eq!(PowerSource::resolve(Some(4), Some(60)), PowerSource::CoinCell { level: Some(60) });
    /// assert_eq!(PowerSource::resolve(None, Some(90)), PowerSource::GenericBattery { level: Some(90) });
    /// assert_eq!(PowerSource::resolve(None, None), PowerSource::Unknown);
    /// ```
    pub fn resolve(source: Option<u8>, level: Option<u8>) -> Self {
        match source {
            Some(1) => PowerSource::Usb,
            Some(2) => PowerSource::Aa { level },
            Some(3) => PowerSource::GenericBattery { level },
            Some(4) => PowerSource::CoinCell { level },
            _ if level.is_some() => PowerSource::GenericBattery { level },
            _ => PowerSource::Unknown,
        }
    }

    /// Battery level, if the board runs on a battery and reported one.
    pub fn battery_level(&self) -> Option<u8> {
        match self {
            PowerSource::Aa { level }
            | PowerSource::CoinCell { level }
            | PowerSource::GenericBattery { level } => *level,
            PowerSource::Unknown | PowerSource::Usb => None,
        }
    }

    /// Whether the board runs on a coin cell.
    pub fn is_coin_cell(&self) -> bool {
        matches!(self, PowerSource::CoinCell { .. })
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, level) = match self {
            PowerSource::Unknown => return write!(f, "unknown"),
            PowerSource::Usb => return write!(f, "USB"),
            PowerSource::Aa { level } => ("AA", level),
            PowerSource::CoinCell { level } => ("coin cell", level),
            PowerSource::GenericBattery { level } => ("battery", level),
        };
        match level {
            Some(level) => write!(f, "{name} ({level}%)"),
            None => write!(f, "{name}"),
        }
    }
}

/// Board model, inferred from the Model Number string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceModel {
    #[default]
    Unknown,
    /// Thunderboard React (RD-0057).
    React,
    /// Thunderboard Sense family (BRD4160A, BRD4166A, BRD4184A).
    Sense,
}

impl DeviceModel {
    /// Infer the model from a Model Number string.
    ///
    /// ```
    /// use thunderboard_types::DeviceModel;
    ///
    /// assert_eq!(DeviceModel::from_model_number("RD-0057"), DeviceModel::React);
    /// assert_eq!(DeviceModel::from_model_number("BRD4166A"), DeviceModel::Sense);
    /// assert_eq!(DeviceModel::from_model_number("nRF52"), DeviceModel::Unknown);
    /// ```
    pub fn from_model_number(model: &str) -> Self {
        let model = model.trim_end_matches('\0').trim().to_uppercase();
        if model.contains("RD-0057") {
            DeviceModel::React
        } else if ["BRD4160", "BRD4166", "BRD4184"]
            .iter()
            .any(|prefix| model.contains(prefix))
        {
            DeviceModel::Sense
        } else {
            DeviceModel::Unknown
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceModel::Unknown => write!(f, "Unknown"),
            DeviceModel::React => write!(f, "Thunderboard React"),
            DeviceModel::Sense => write!(f, "Thunderboard Sense"),
        }
    }
}

/// Connection state of one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Radio power state of the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PowerState {
    /// Adapter has not reported yet.
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

/// Orientation in degrees around each axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Orientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Acceleration in g along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Wheel revolution data from a CSC measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WheelRevolutions {
    /// Cumulative revolutions since the last reset.
    pub cumulative: u32,
    /// Time of the last revolution event, in 1/1024 s, wrapping at 64 s.
    pub last_event_time: u16,
}

/// Crank revolution data from a CSC measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrankRevolutions {
    pub cumulative: u16,
    pub last_event_time: u16,
}

/// A decoded cycling-speed-and-cadence measurement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CscMeasurement {
    pub wheel: Option<WheelRevolutions>,
    pub crank: Option<CrankRevolutions>,
}

impl CscMeasurement {
    /// Revolutions per minute between `previous` and this sample.
    ///
    /// Both counters wrap; returns `None` when either sample lacks wheel data
    /// or no time elapsed.
    pub fn rpm_since(&self, previous: &CscMeasurement) -> Option<f32> {
        let now = self.wheel?;
        let before = previous.wheel?;
        let revolutions = now.cumulative.wrapping_sub(before.cumulative);
        let ticks = now.last_event_time.wrapping_sub(before.last_event_time);
        if ticks == 0 {
            return None;
        }
        let seconds = f32::from(ticks) / 1024.0;
        Some(revolutions as f32 / seconds * 60.0)
    }
}

/// Hall effect sensor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HallState {
    Closed,
    Open,
    Tamper,
}

/// Number of digital lines carried by the Automation IO mask byte.
pub const DIGITAL_LINES: usize = 4;

const DIGITAL_ACTIVE: u8 = 0b01;

fn line_active(mask: u8, index: usize) -> bool {
    index < DIGITAL_LINES && (mask >> (index * 2)) & 0b11 == DIGITAL_ACTIVE
}

/// Button state decoded from the digital input mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DigitalInputs {
    /// Raw mask, two bits per line.
    pub mask: u8,
}

impl DigitalInputs {
    /// Whether the button on `index` is pressed.
    pub fn is_pressed(&self, index: usize) -> bool {
        line_active(self.mask, index)
    }
}

/// LED state written to the digital output channel.
///
/// Writes always carry the full mask, so repeating a write is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LedState {
    pub mask: u8,
}

impl LedState {
    /// Whether the LED on `index` is on.
    pub fn is_on(&self, index: usize) -> bool {
        line_active(self.mask, index)
    }

    /// Return a copy with the LED on `index` switched.
    #[must_use]
    pub fn with(mut self, index: usize, on: bool) -> Self {
        if index < DIGITAL_LINES {
            let shift = index * 2;
            self.mask &= !(0b11 << shift);
            if on {
                self.mask |= DIGITAL_ACTIVE << shift;
            }
        }
        self
    }
}

/// Color for the Sense RGB LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RgbColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// A reading from a sub-sensor that can be powered off.
///
/// The air quality sensor is disabled on some power sources, so its readings
/// carry an explicit flag next to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GatedReading {
    pub enabled: bool,
    pub value: Option<u16>,
}

/// Latest environmental readings; any sensor may be absent until its first
/// successful read.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvironmentReadings {
    /// Degrees Celsius.
    pub temperature: Option<f32>,
    /// Percent relative humidity.
    pub humidity: Option<f32>,
    pub uv_index: Option<u8>,
    /// Lux.
    pub ambient_light: Option<f32>,
    /// Millibar.
    pub pressure: Option<f32>,
    /// Decibel.
    pub sound_level: Option<f32>,
    /// ppm.
    pub co2: GatedReading,
    /// ppb.
    pub voc: GatedReading,
    pub hall_state: Option<HallState>,
    /// Microtesla.
    pub hall_field_strength: Option<i32>,
    /// When the last value was applied.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub captured_at: Option<time::OffsetDateTime>,
}

/// Commands accepted by the motion command control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum MotionCommand {
    /// Start accelerometer calibration.
    Calibrate = 0x01,
    /// Zero the orientation.
    ResetOrientation = 0x02,
}

impl MotionCommand {
    /// The request opcode written to the control point.
    pub fn opcode(&self) -> u8 {
        *self as u8
    }

    /// Map a request opcode back to its command.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x01 => Some(MotionCommand::Calibrate),
            0x02 => Some(MotionCommand::ResetOrientation),
            _ => None,
        }
    }
}

/// Response opcode prefix shared by the motion and CSC control points.
pub const RESPONSE_OPCODE: u8 = 0x10;

/// Result code for a successful control point request.
pub const RESPONSE_SUCCESS: u8 = 0x01;

/// A control point indication: `[0x10, request opcode, result]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandResponse {
    /// Opcode of the request this response confirms.
    pub request: u8,
    pub result: u8,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.result == RESPONSE_SUCCESS
    }
}

/// Identifier of the board that the System ID channel reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoardId(pub u32);

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
