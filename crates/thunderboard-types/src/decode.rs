//! Channel payload decoding and command encoding.
//!
//! Payload layouts are fixed by the GATT profiles the boards implement: raw
//! little-endian integers at fixed offsets. Decoders return `None` for short
//! or malformed payloads; callers treat that exactly like "no value yet".

use bytes::Buf;

use crate::types::{
    Acceleration, BoardId, CommandResponse, CrankRevolutions, CscMeasurement, DigitalInputs,
    HallState, LedState, MotionCommand, Orientation, RESPONSE_OPCODE, RgbColor, WheelRevolutions,
};

/// Mask applied to the System ID value to obtain the board identifier.
pub const BOARD_ID_MASK: u64 = 0x00FF_FFFF;

const CSC_WHEEL_PRESENT: u8 = 0x01;
const CSC_CRANK_PRESENT: u8 = 0x02;

/// CSC control point opcode: set cumulative value.
pub const CSC_SET_CUMULATIVE: u8 = 0x01;

fn exact<const N: usize>(data: &[u8]) -> Option<&[u8]> {
    (data.len() >= N).then_some(data)
}

/// Temperature in °C from an i16 in hundredths.
pub fn temperature(data: &[u8]) -> Option<f32> {
    let mut buf = exact::<2>(data)?;
    Some(f32::from(buf.get_i16_le()) / 100.0)
}

/// Relative humidity in percent from a u16 in hundredths.
pub fn humidity(data: &[u8]) -> Option<f32> {
    let mut buf = exact::<2>(data)?;
    Some(f32::from(buf.get_u16_le()) / 100.0)
}

/// UV index.
pub fn uv_index(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// Ambient light in lux from a u32 in hundredths.
pub fn ambient_light(data: &[u8]) -> Option<f32> {
    let mut buf = exact::<4>(data)?;
    Some(buf.get_u32_le() as f32 / 100.0)
}

/// Air pressure in millibar from a u32 in tenths of a pascal.
pub fn air_pressure(data: &[u8]) -> Option<f32> {
    let mut buf = exact::<4>(data)?;
    Some(buf.get_u32_le() as f32 / 1000.0)
}

/// Sound level in dB from an i16 in hundredths.
pub fn sound_level(data: &[u8]) -> Option<f32> {
    let mut buf = exact::<2>(data)?;
    Some(f32::from(buf.get_i16_le()) / 100.0)
}

/// Equivalent CO2 in ppm.
pub fn co2(data: &[u8]) -> Option<u16> {
    let mut buf = exact::<2>(data)?;
    Some(buf.get_u16_le())
}

/// Total VOC in ppb.
pub fn voc(data: &[u8]) -> Option<u16> {
    let mut buf = exact::<2>(data)?;
    Some(buf.get_u16_le())
}

/// Hall effect state.
pub fn hall_state(data: &[u8]) -> Option<HallState> {
    match data.first()? {
        0 => Some(HallState::Closed),
        1 => Some(HallState::Open),
        2 => Some(HallState::Tamper),
        _ => None,
    }
}

/// Hall effect field strength in µT.
pub fn hall_field_strength(data: &[u8]) -> Option<i32> {
    let mut buf = exact::<4>(data)?;
    Some(buf.get_i32_le())
}

/// Acceleration from three i16 values in thousandths of g.
pub fn acceleration(data: &[u8]) -> Option<Acceleration> {
    let mut buf = exact::<6>(data)?;
    Some(Acceleration {
        x: f32::from(buf.get_i16_le()) / 1000.0,
        y: f32::from(buf.get_i16_le()) / 1000.0,
        z: f32::from(buf.get_i16_le()) / 1000.0,
    })
}

/// Orientation from three i16 values in hundredths of a degree.
pub fn orientation(data: &[u8]) -> Option<Orientation> {
    let mut buf = exact::<6>(data)?;
    Some(Orientation {
        x: f32::from(buf.get_i16_le()) / 100.0,
        y: f32::from(buf.get_i16_le()) / 100.0,
        z: f32::from(buf.get_i16_le()) / 100.0,
    })
}

/// A variable-length CSC measurement record.
///
/// Byte 0 carries flags; wheel data (u32 revolutions, u16 event time) follows
/// when bit 0 is set, then crank data (u16, u16) when bit 1 is set.
pub fn csc_measurement(data: &[u8]) -> Option<CscMeasurement> {
    let mut buf = data;
    if !buf.has_remaining() {
        return None;
    }
    let flags = buf.get_u8();

    let wheel = if flags & CSC_WHEEL_PRESENT != 0 {
        if buf.remaining() < 6 {
            return None;
        }
        Some(WheelRevolutions {
            cumulative: buf.get_u32_le(),
            last_event_time: buf.get_u16_le(),
        })
    } else {
        None
    };

    let crank = if flags & CSC_CRANK_PRESENT != 0 {
        if buf.remaining() < 4 {
            return None;
        }
        Some(CrankRevolutions {
            cumulative: buf.get_u16_le(),
            last_event_time: buf.get_u16_le(),
        })
    } else {
        None
    };

    Some(CscMeasurement { wheel, crank })
}

/// A control point indication `[0x10, request opcode, result]`.
pub fn command_response(data: &[u8]) -> Option<CommandResponse> {
    match data {
        [RESPONSE_OPCODE, request, result, ..] => Some(CommandResponse {
            request: *request,
            result: *result,
        }),
        _ => None,
    }
}

/// Battery level in percent.
pub fn battery_level(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// Raw power source byte (see [`crate::PowerSource::resolve`]).
pub fn power_source(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// Board identifier: the System ID as a little-endian u64, masked to 24 bits.
pub fn board_id(data: &[u8]) -> Option<BoardId> {
    let mut buf = exact::<8>(data)?;
    Some(BoardId((buf.get_u64_le() & BOARD_ID_MASK) as u32))
}

/// A UTF-8 string channel with trailing NULs removed.
pub fn string(data: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(data).ok()?;
    Some(s.trim_end_matches('\0').to_string())
}

/// Button mask from the digital input channel.
pub fn digital_inputs(data: &[u8]) -> Option<DigitalInputs> {
    data.first().map(|&mask| DigitalInputs { mask })
}

/// Full LED mask for the digital output channel.
pub fn encode_leds(leds: LedState) -> Vec<u8> {
    vec![leds.mask]
}

/// RGB LED payload: `[on mask, red, green, blue]`; all four LEDs share the color.
pub fn encode_rgb(on: bool, color: RgbColor) -> Vec<u8> {
    let mask = if on { 0x0F } else { 0x00 };
    vec![mask, color.red, color.green, color.blue]
}

/// Motion command payload.
pub fn encode_motion_command(command: MotionCommand) -> Vec<u8> {
    vec![command.opcode()]
}

/// CSC control point payload resetting cumulative revolutions to zero.
pub fn encode_revolution_reset() -> Vec<u8> {
    let mut payload = vec![CSC_SET_CUMULATIVE];
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload
}
