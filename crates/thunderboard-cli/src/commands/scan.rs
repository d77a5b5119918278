//! Scan command implementation.

use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};
use thunderboard_core::BleManager;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_scan_text};
use crate::util::write_output;

/// Scan for the manager's configured window and list every board seen.
pub async fn cmd_scan(
    manager: &BleManager,
    format: OutputFormat,
    opts: &FormatOptions,
    aliases: &HashMap<String, String>,
    out: &mut impl Write,
) -> Result<()> {
    let devices = manager
        .scan()
        .await
        .context("Failed to scan for boards")?;

    let content = match format {
        OutputFormat::Json => opts.as_json(&devices)?,
        OutputFormat::Text => format_scan_text(&devices, opts, aliases),
    };
    write_output(out, &content)
}
