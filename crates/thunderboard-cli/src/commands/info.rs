//! Info command implementation.

use std::io::Write;

use anyhow::Result;
use thunderboard_core::BleManager;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_info_text};
use crate::util::{IDENTITY_TIMEOUT, connect_board, wait_for_identity, write_output};

pub async fn cmd_info(
    manager: &BleManager,
    identifier: &str,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let device = connect_board(manager, identifier).await?;
    let device = wait_for_identity(manager, &device.id, IDENTITY_TIMEOUT).await?;

    manager.disconnect(&device.id).await.ok();

    let content = match format {
        OutputFormat::Json => opts.as_json(&device)?,
        OutputFormat::Text => format_info_text(&device),
    };
    write_output(out, &content)
}
