//! I/O demo command implementation.

use std::io::Write;

use anyhow::{Context, Result, bail};
use thunderboard_core::{BleManager, DemoKind, IoDemoConnection, IoEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, IoReport, format_io_text, format_success};
use crate::util::{connect_board, write_output};

/// Switch one LED instead of watching the buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
    pub index: usize,
    pub on: bool,
}

fn report(io: &IoDemoConnection) -> IoReport {
    IoReport::new(io.input_state(), io.led_state(), io.rgb_state())
}

fn render(report: &IoReport, format: OutputFormat, opts: &FormatOptions) -> Result<String> {
    match format {
        OutputFormat::Json => opts.as_json(report),
        OutputFormat::Text => Ok(format_io_text(report, opts)),
    }
}

/// Run the I/O demo on `identifier`.
///
/// With `led` the LED is switched and the command returns. Without it the
/// button state is printed on every change until interrupted.
pub async fn cmd_io(
    manager: &BleManager,
    identifier: &str,
    led: Option<LedCommand>,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let device = connect_board(manager, identifier).await?;
    let io = manager
        .configure_demo(&device.id, DemoKind::Io)
        .await
        .context("Failed to configure the I/O demo")?
        .into_io()
        .context("Board returned a different demo")?;

    if let Some(LedCommand { index, on }) = led {
        io.set_led(index, on)
            .await
            .with_context(|| format!("Failed to switch LED {}", index))?;
        let content = match format {
            OutputFormat::Json => opts.as_json(&report(&io))?,
            OutputFormat::Text => format_success(
                &format!("LED {} {}", index, if on { "on" } else { "off" }),
                opts.no_color,
            ),
        };
        write_output(out, &content)?;
        manager.disconnect(&device.id).await.ok();
        return Ok(());
    }

    let mut events = io.subscribe();
    write_output(out, &render(&report(&io), format, opts)?)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(IoEvent::Inputs(_)) | Err(RecvError::Lagged(_)) => {
                    write_output(out, &render(&report(&io), format, opts)?)?;
                }
                Ok(IoEvent::Disconnected) | Err(RecvError::Closed) => {
                    bail!("Board disconnected");
                }
            },
        }
    }

    manager.disconnect(&device.id).await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{mock_manager, plain, text};
    use thunderboard_core::mock::{MockPeripheral, MockRequest};
    use thunderboard_core::{PeripheralId, uuids};

    #[tokio::test]
    async fn test_switch_led_writes_mask() {
        let (manager, transport) =
            mock_manager(vec![MockPeripheral::thunderboard_react("react-1")]).await;

        let mut out = Vec::new();
        cmd_io(
            &manager,
            "react-1",
            Some(LedCommand { index: 1, on: true }),
            OutputFormat::Text,
            &plain(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(text(out), "[OK] LED 1 on\n");
        let writes: Vec<Vec<u8>> = transport
            .requests()
            .await
            .into_iter()
            .filter_map(|r| match r {
                MockRequest::Write { uuid, value, .. } if uuid == uuids::DIGITAL => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![vec![0b0000_0100]]);
    }

    #[tokio::test]
    async fn test_switch_led_out_of_range() {
        let (manager, _transport) =
            mock_manager(vec![MockPeripheral::thunderboard_react("react-1")]).await;

        let mut out = Vec::new();
        let err = cmd_io(
            &manager,
            "react-1",
            Some(LedCommand { index: 9, on: true }),
            OutputFormat::Json,
            &plain(),
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("LED 9"));
    }

    #[tokio::test]
    async fn test_watch_prints_button_changes_until_disconnect() {
        let (manager, transport) =
            mock_manager(vec![MockPeripheral::thunderboard_react("react-1")]).await;
        let id = PeripheralId::new("react-1");

        let opts = plain();
        let mut out = Vec::new();
        let watch = cmd_io(&manager, "react-1", None, OutputFormat::Json, &opts, &mut out);
        let drive = async {
            loop {
                let configured = manager
                    .device(&id)
                    .await
                    .is_some_and(|d| d.demo == Some(DemoKind::Io) && !d.configuring);
                if configured {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            transport.notify_value(&id, uuids::DIGITAL, [0b0000_0001u8]);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            transport.simulate_disconnect(&id).await;
        };

        let (result, ()) = tokio::join!(watch, drive);
        assert!(result.unwrap_err().to_string().contains("disconnected"));

        let out = text(out);
        let reports: Vec<serde_json::Value> = serde_json::Deserializer::from_str(&out)
            .into_iter::<serde_json::Value>()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(reports.len() >= 2);
        assert_eq!(reports.last().unwrap()["buttons"][0], true);
    }
}
