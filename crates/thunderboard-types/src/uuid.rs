//! Bluetooth UUIDs for Thunderboard boards.
//!
//! This module contains the service and characteristic ("channel") UUIDs the
//! Thunderboard React and Thunderboard Sense firmware expose. Standard GATT
//! profile UUIDs are spelled out in their 128-bit form.

use uuid::{Uuid, uuid};

// --- Standard GATT services ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Automation IO service (buttons and LEDs).
pub const AUTOMATION_IO_SERVICE: Uuid = uuid!("00001815-0000-1000-8000-00805f9b34fb");

/// Cycling Speed and Cadence service (React revolution counter).
pub const CSC_SERVICE: Uuid = uuid!("00001816-0000-1000-8000-00805f9b34fb");

/// Environmental Sensing service.
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid!("0000181a-0000-1000-8000-00805f9b34fb");

// --- Silicon Labs custom services ---

/// Acceleration and orientation service.
pub const ACCELERATION_ORIENTATION_SERVICE: Uuid = uuid!("a4e649f4-4be5-11e5-885d-feff819cdc9f");

/// Ambient light service (Sense).
pub const AMBIENT_LIGHT_SERVICE: Uuid = uuid!("d24c4f4e-17a7-4548-852c-abf51127368b");

/// Indoor air quality service (Sense).
pub const INDOOR_AIR_QUALITY_SERVICE: Uuid = uuid!("efd658ae-c400-ef33-76e7-91b00019103b");

/// Hall effect service (Sense 2).
pub const HALL_EFFECT_SERVICE: Uuid = uuid!("f598dbc5-2f00-4ec5-9936-b3d1aa4f957f");

/// User interface service carrying the RGB LEDs (Sense).
pub const USER_INTERFACE_SERVICE: Uuid = uuid!("fcb89c40-c600-59f3-7dc3-5ece444a401b");

/// Power management service (Sense).
pub const POWER_MANAGEMENT_SERVICE: Uuid = uuid!("ec61a454-ed00-a5e8-b8f9-de9ec026ec51");

// --- Identity channels ---

/// Device name string.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// System ID; the masked low 24 bits identify the board.
pub const SYSTEM_IDENTIFIER: Uuid = uuid!("00002a23-0000-1000-8000-00805f9b34fb");

/// Model number string, used to tell React from Sense boards.
pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Firmware revision string.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Manufacturer name string.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Battery level (percent).
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Power source (USB, AA, AAA, coin cell).
pub const POWER_SOURCE: Uuid = uuid!("ec61a454-ed01-a5e8-b8f9-de9ec026ec51");

// --- IO demo ---

/// Automation IO digital channel. Boards expose it twice: a notifiable input
/// (buttons) and a writable output (LEDs).
pub const DIGITAL: Uuid = uuid!("00002a56-0000-1000-8000-00805f9b34fb");

/// RGB LED channel (Sense).
pub const RGB_LEDS: Uuid = uuid!("fcb89c40-c603-59f3-7dc3-5ece444a401b");

// --- Environment demo ---

/// Temperature, i16 in hundredths of a degree Celsius.
pub const TEMPERATURE: Uuid = uuid!("00002a6e-0000-1000-8000-00805f9b34fb");

/// Relative humidity, u16 in hundredths of a percent.
pub const HUMIDITY: Uuid = uuid!("00002a6f-0000-1000-8000-00805f9b34fb");

/// UV index, u8.
pub const UV_INDEX: Uuid = uuid!("00002a76-0000-1000-8000-00805f9b34fb");

/// Air pressure, u32 in tenths of a pascal.
pub const AIR_PRESSURE: Uuid = uuid!("00002a6d-0000-1000-8000-00805f9b34fb");

/// Ambient light, u32 in hundredths of a lux.
pub const AMBIENT_LIGHT: Uuid = uuid!("c8546913-bfd9-45eb-8dde-9f8754f4a32e");

/// Sound level, i16 in hundredths of a decibel.
pub const SOUND_LEVEL: Uuid = uuid!("c8546913-bf02-45eb-8dde-9f8754f4a32e");

/// Equivalent CO2, u16 ppm.
pub const AIR_QUALITY_CO2: Uuid = uuid!("efd658ae-c401-ef33-76e7-91b00019103b");

/// Total volatile organic compounds, u16 ppb.
pub const AIR_QUALITY_VOC: Uuid = uuid!("efd658ae-c402-ef33-76e7-91b00019103b");

/// Hall effect state, u8 (closed/open/tamper).
pub const HALL_STATE: Uuid = uuid!("f598dbc5-2f01-4ec5-9936-b3d1aa4f957f");

/// Hall effect field strength, i32 microtesla.
pub const HALL_FIELD_STRENGTH: Uuid = uuid!("f598dbc5-2f02-4ec5-9936-b3d1aa4f957f");

// --- Motion demo ---

/// Acceleration vector, 3 x i16 in thousandths of g.
pub const ACCELERATION_MEASUREMENT: Uuid = uuid!("c4c1f6e2-4be5-11e5-885d-feff819cdc9f");

/// Orientation vector, 3 x i16 in hundredths of a degree.
pub const ORIENTATION_MEASUREMENT: Uuid = uuid!("b7c4b694-bee3-45dd-ba9f-f3b5e994f49a");

/// Motion command control point (calibrate, reset orientation).
pub const COMMAND: Uuid = uuid!("71e30b8c-4131-4703-b0a0-b0bbba75856b");

/// CSC measurement record.
pub const CSC_MEASUREMENT: Uuid = uuid!("00002a5b-0000-1000-8000-00805f9b34fb");

/// CSC feature flags.
pub const CSC_FEATURE: Uuid = uuid!("00002a5c-0000-1000-8000-00805f9b34fb");

/// Speed and cadence control point (reset cumulative revolutions).
pub const CSC_CONTROL_POINT: Uuid = uuid!("00002a55-0000-1000-8000-00805f9b34fb");
