//! Output formatting utilities for text and JSON output.

use std::collections::HashMap;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use thunderboard_core::{DeviceSnapshot, MotionEvent};
use thunderboard_types::{
    Acceleration, DIGITAL_LINES, DigitalInputs, EnvironmentReadings, GatedReading, HallState,
    LedState, Orientation, RgbColor,
};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}\n", message)
    } else {
        format!("{} {}\n", "[OK]".green(), message)
    }
}

/// Format a failure message.
pub fn format_failure(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}\n", message)
    } else {
        format!("{} {}\n", "[!!]".red(), message)
    }
}

/// Format RSSI as a visual signal bar.
/// RSSI typically ranges from -100 dBm (weak) to -30 dBm (strong).
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "N/A".to_string();
    };

    let filled = (((rssi + 100).clamp(0, 70) as f32 / 7.0).round() as usize).min(10);
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled));

    if no_color {
        format!("{} {:>3}", bar, rssi)
    } else if filled >= 7 {
        format!("{} {:>3}", bar.green(), rssi)
    } else if filled >= 4 {
        format!("{} {:>3}", bar.yellow(), rssi)
    } else {
        format!("{} {:>3}", bar.red(), rssi)
    }
}

fn alias_for<'a>(device: &DeviceSnapshot, aliases: &'a HashMap<String, String>) -> Option<&'a str> {
    aliases
        .iter()
        .find(|(_, target)| {
            target.eq_ignore_ascii_case(device.id.as_str())
                || device
                    .name
                    .as_deref()
                    .is_some_and(|name| target.eq_ignore_ascii_case(name))
        })
        .map(|(alias, _)| alias.as_str())
}

#[must_use]
pub fn format_scan_text(
    devices: &[DeviceSnapshot],
    opts: &FormatOptions,
    aliases: &HashMap<String, String>,
) -> String {
    if devices.is_empty() {
        return "No Thunderboards found.\n".to_string();
    }

    let count = if opts.no_color {
        devices.len().to_string()
    } else {
        devices.len().to_string().green().bold().to_string()
    };

    let mut builder = Builder::default();
    builder.push_record(["Name", "Alias", "Signal", "Identifier"]);
    for device in devices {
        builder.push_record([
            device.display_name().to_string(),
            alias_for(device, aliases).unwrap_or("-").to_string(),
            format_signal_bar(device.rssi, opts.no_color),
            device.id.to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());

    format!("Found {} Thunderboard(s)\n\n{}\n", count, table)
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[must_use]
pub fn format_info_text(device: &DeviceSnapshot) -> String {
    let capabilities = if device.capabilities.is_empty() {
        "-".to_string()
    } else {
        device
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut builder = Builder::default();
    builder.push_record(["Property", "Value"]);
    builder.push_record(["Name".to_string(), device.display_name().to_string()]);
    builder.push_record(["Identifier".to_string(), device.id.to_string()]);
    builder.push_record(["Model".to_string(), device.model.to_string()]);
    builder.push_record(["Board ID".to_string(), or_dash(device.board_id)]);
    builder.push_record(["Firmware".to_string(), or_dash(device.firmware_version.as_deref())]);
    builder.push_record(["Power".to_string(), device.power_source.to_string()]);
    builder.push_record([
        "Signal".to_string(),
        device
            .signal
            .map(|s| s.description().to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    builder.push_record(["Capabilities".to_string(), capabilities]);

    let mut table = builder.build();
    table.with(Style::rounded());
    format!("{}\n", table)
}

fn format_gated(reading: &GatedReading, unit: &str) -> Option<String> {
    if !reading.enabled {
        return None;
    }
    reading.value.map(|v| format!("{} {}", v, unit))
}

fn format_hall_state(state: HallState) -> &'static str {
    match state {
        HallState::Closed => "closed",
        HallState::Open => "open",
        HallState::Tamper => "tamper",
    }
}

/// Format one set of environment readings, one line per present sensor.
#[must_use]
pub fn format_environment_text(readings: &EnvironmentReadings, opts: &FormatOptions) -> String {
    let rows: Vec<(&str, Option<String>)> = vec![
        ("Temperature", readings.temperature.map(|v| format!("{:.1} °C", v))),
        ("Humidity", readings.humidity.map(|v| format!("{:.1} %", v))),
        ("UV index", readings.uv_index.map(|v| v.to_string())),
        ("Ambient light", readings.ambient_light.map(|v| format!("{:.0} lx", v))),
        ("Pressure", readings.pressure.map(|v| format!("{:.1} mbar", v))),
        ("Sound level", readings.sound_level.map(|v| format!("{:.1} dB", v))),
        ("CO2", format_gated(&readings.co2, "ppm")),
        ("VOC", format_gated(&readings.voc, "ppb")),
        ("Hall state", readings.hall_state.map(|s| format_hall_state(s).to_string())),
        (
            "Field strength",
            readings.hall_field_strength.map(|v| format!("{} µT", v)),
        ),
    ];

    let mut output = String::new();
    for (label, value) in rows {
        let Some(value) = value else { continue };
        if opts.no_color {
            output.push_str(&format!("{:<15} {}\n", label, value));
        } else {
            output.push_str(&format!("{:<15} {}\n", label.dimmed(), value.bold()));
        }
    }
    if output.is_empty() {
        output.push_str("No readings yet.\n");
    }
    output
}

/// Snapshot of the I/O demo state for output.
#[derive(Debug, Clone, Serialize)]
pub struct IoReport {
    pub buttons: Vec<bool>,
    pub leds: Vec<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb: Option<RgbColor>,
}

impl IoReport {
    pub fn new(inputs: DigitalInputs, leds: LedState, rgb: Option<RgbColor>) -> Self {
        Self {
            buttons: (0..DIGITAL_LINES).map(|i| inputs.is_pressed(i)).collect(),
            leds: (0..DIGITAL_LINES).map(|i| leds.is_on(i)).collect(),
            rgb,
        }
    }
}

fn format_lines(states: &[bool], on: &str, off: &str) -> String {
    states
        .iter()
        .enumerate()
        .map(|(i, active)| format!("{}:{}", i, if *active { on } else { off }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[must_use]
pub fn format_io_text(report: &IoReport, opts: &FormatOptions) -> String {
    let buttons = format_lines(&report.buttons, "pressed", "released");
    let leds = format_lines(&report.leds, "on", "off");
    let mut output = if opts.no_color {
        format!("Buttons  {}\nLEDs     {}\n", buttons, leds)
    } else {
        format!("{}  {}\n{}     {}\n", "Buttons".dimmed(), buttons, "LEDs".dimmed(), leds)
    };
    if let Some(rgb) = report.rgb {
        output.push_str(&format!(
            "RGB      #{:02x}{:02x}{:02x}\n",
            rgb.red, rgb.green, rgb.blue
        ));
    }
    output
}

/// One motion demo sample, as printed by the motion command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionSample {
    Orientation(Orientation),
    Acceleration(Acceleration),
    Revolutions { cumulative: u32, rpm: Option<f32> },
}

impl MotionSample {
    /// The sample carried by `event`, if it is a measurement.
    pub fn from_event(event: &MotionEvent) -> Option<Self> {
        match *event {
            MotionEvent::Orientation(orientation) => Some(Self::Orientation(orientation)),
            MotionEvent::Acceleration(acceleration) => Some(Self::Acceleration(acceleration)),
            MotionEvent::Revolutions { cumulative, rpm } => {
                Some(Self::Revolutions { cumulative, rpm })
            }
            _ => None,
        }
    }
}

#[must_use]
pub fn format_motion_text(sample: &MotionSample) -> String {
    match sample {
        MotionSample::Orientation(o) => {
            format!("orientation   x={:>7.2}° y={:>7.2}° z={:>7.2}°\n", o.x, o.y, o.z)
        }
        MotionSample::Acceleration(a) => {
            format!("acceleration  x={:>6.3}g  y={:>6.3}g  z={:>6.3}g\n", a.x, a.y, a.z)
        }
        MotionSample::Revolutions { cumulative, rpm } => match rpm {
            Some(rpm) => format!("revolutions   {} ({:.0} rpm)\n", cumulative, rpm),
            None => format!("revolutions   {}\n", cumulative),
        },
    }
}
