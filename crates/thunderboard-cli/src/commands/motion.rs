//! Motion demo command implementation.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use thunderboard_core::{BleManager, DemoKind, MotionDemoConnection, MotionEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

use crate::cli::OutputFormat;
use crate::format::{
    FormatOptions, MotionSample, format_failure, format_motion_text, format_success,
};
use crate::util::{connect_board, write_output};

/// Longest a motion command may take to be confirmed by the board.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// A one-shot motion demo command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAction {
    Calibrate,
    ResetOrientation,
    ResetRevolutions,
}

impl MotionAction {
    fn describe(&self) -> &'static str {
        match self {
            MotionAction::Calibrate => "Calibration",
            MotionAction::ResetOrientation => "Orientation reset",
            MotionAction::ResetRevolutions => "Revolution reset",
        }
    }

    async fn send(&self, motion: &MotionDemoConnection) -> thunderboard_core::Result<()> {
        match self {
            MotionAction::Calibrate => motion.start_calibration().await,
            MotionAction::ResetOrientation => motion.reset_orientation().await,
            MotionAction::ResetRevolutions => motion.reset_revolutions().await,
        }
    }

    /// The result carried by `event`, if it finishes this action.
    fn finished(&self, event: &MotionEvent) -> Option<bool> {
        match (self, event) {
            (MotionAction::Calibrate, MotionEvent::CalibrationFinished { success })
            | (MotionAction::ResetOrientation, MotionEvent::OrientationResetFinished { success })
            | (MotionAction::ResetRevolutions, MotionEvent::RevolutionsResetFinished { success }) => {
                Some(*success)
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ActionReport {
    action: MotionAction,
    success: bool,
}

async fn wait_finished(
    action: MotionAction,
    events: &mut broadcast::Receiver<MotionEvent>,
) -> Result<bool> {
    loop {
        match events.recv().await {
            Ok(MotionEvent::Disconnected) | Err(RecvError::Closed) => {
                bail!("Board disconnected");
            }
            Ok(event) => {
                if let Some(success) = action.finished(&event) {
                    return Ok(success);
                }
            }
            Err(RecvError::Lagged(_)) => continue,
        }
    }
}

async fn run_action(
    motion: &MotionDemoConnection,
    action: MotionAction,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let mut events = motion.subscribe();
    action
        .send(motion)
        .await
        .with_context(|| format!("{} failed", action.describe()))?;

    let success = timeout(COMMAND_TIMEOUT, wait_finished(action, &mut events))
        .await
        .with_context(|| format!("{} was not confirmed in time", action.describe()))??;

    let content = match format {
        OutputFormat::Json => opts.as_json(&ActionReport { action, success })?,
        OutputFormat::Text if success => {
            format_success(&format!("{} finished", action.describe()), opts.no_color)
        }
        OutputFormat::Text => {
            format_failure(&format!("{} rejected by the board", action.describe()), opts.no_color)
        }
    };
    write_output(out, &content)?;

    if !success {
        bail!("{} rejected by the board", action.describe());
    }
    Ok(())
}

async fn stream(
    motion: &MotionDemoConnection,
    count: usize,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let mut events = motion.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0;
    while count == 0 || printed < count {
        let event = tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(MotionEvent::Disconnected) | Err(RecvError::Closed) => bail!("Board disconnected"),
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
        };
        let Some(sample) = MotionSample::from_event(&event) else {
            continue;
        };
        let content = match format {
            OutputFormat::Json => opts.as_json(&sample)?,
            OutputFormat::Text => format_motion_text(&sample),
        };
        write_output(out, &content)?;
        printed += 1;
    }
    Ok(())
}

/// Run the motion demo on `identifier`.
///
/// With an `action` the command is sent and its confirmation awaited.
/// Without one, `count` measurement samples are printed (zero runs until
/// interrupted).
pub async fn cmd_motion(
    manager: &BleManager,
    identifier: &str,
    action: Option<MotionAction>,
    count: usize,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let device = connect_board(manager, identifier).await?;
    let motion = manager
        .configure_demo(&device.id, DemoKind::Motion)
        .await
        .context("Failed to configure the motion demo")?
        .into_motion()
        .context("Board returned a different demo")?;

    let result = match action {
        Some(action) => run_action(&motion, action, format, opts, out).await,
        None => stream(&motion, count, format, opts, out).await,
    };

    manager.disconnect(&device.id).await.ok();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{mock_manager, plain, text};
    use thunderboard_core::mock::{MockPeripheral, MockRequest};
    use thunderboard_core::{PeripheralId, uuids};

    async fn wait_for_motion_demo(manager: &BleManager, id: &PeripheralId) {
        loop {
            let configured = manager
                .device(id)
                .await
                .is_some_and(|d| d.demo == Some(DemoKind::Motion) && !d.configuring);
            if configured {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_calibrate_waits_for_confirmation() {
        let (manager, transport) =
            mock_manager(vec![MockPeripheral::thunderboard_sense("sense-1")]).await;

        let mut out = Vec::new();
        cmd_motion(
            &manager,
            "sense-1",
            Some(MotionAction::Calibrate),
            0,
            OutputFormat::Json,
            &plain(),
            &mut out,
        )
        .await
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text(out)).unwrap();
        assert_eq!(value["action"], "calibrate");
        assert_eq!(value["success"], true);
        assert!(transport.requests().await.iter().any(|r| matches!(
            r,
            MockRequest::Write { uuid, value, .. } if *uuid == uuids::COMMAND && value == &vec![0x01]
        )));
    }

    #[tokio::test]
    async fn test_reset_revolutions_without_csc() {
        let (manager, _transport) =
            mock_manager(vec![MockPeripheral::thunderboard_sense("sense-1")]).await;

        let mut out = Vec::new();
        let err = cmd_motion(
            &manager,
            "sense-1",
            Some(MotionAction::ResetRevolutions),
            0,
            OutputFormat::Text,
            &plain(),
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Revolution reset failed"));
    }

    #[tokio::test]
    async fn test_stream_prints_orientation_samples() {
        let (manager, transport) =
            mock_manager(vec![MockPeripheral::thunderboard_react("react-1")]).await;
        let id = PeripheralId::new("react-1");

        let opts = plain();
        let mut out = Vec::new();
        let run = cmd_motion(&manager, "react-1", None, 2, OutputFormat::Text, &opts, &mut out);
        let drive = async {
            wait_for_motion_demo(&manager, &id).await;
            let orientation = [150i16, -200, 0]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            transport.notify_value(&id, uuids::ORIENTATION_MEASUREMENT, orientation);
            let acceleration = [0i16, 0, 1000]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            transport.notify_value(&id, uuids::ACCELERATION_MEASUREMENT, acceleration);
        };

        let (result, ()) = tokio::join!(run, drive);
        result.unwrap();

        let out = text(out);
        assert!(out.contains("orientation   x=   1.50° y=  -2.00° z=   0.00°"));
        assert!(out.contains("acceleration  x= 0.000g  y= 0.000g  z= 1.000g"));
    }
}
