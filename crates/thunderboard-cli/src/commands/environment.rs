//! Environment demo command implementation.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use thunderboard_core::{BleManager, DemoKind};
use tokio::time::{MissedTickBehavior, interval, sleep};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_environment_text};
use crate::util::{connect_board, write_output};

/// Time given to the reads of one poll to come back before printing.
const SETTLE: Duration = Duration::from_millis(500);

/// Run the environment demo on `identifier` and print `count` readings, one
/// per poll interval. A `count` of zero runs until interrupted.
pub async fn cmd_environment(
    manager: &BleManager,
    identifier: &str,
    count: usize,
    format: OutputFormat,
    opts: &FormatOptions,
    out: &mut impl Write,
) -> Result<()> {
    let device = connect_board(manager, identifier).await?;
    let environment = manager
        .configure_demo(&device.id, DemoKind::Environment)
        .await
        .context("Failed to configure the environment demo")?
        .into_environment()
        .context("Board returned a different demo")?;

    let mut ticker = interval(manager.config().connection.environment_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0;
    while count == 0 || printed < count {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {}
        }
        environment.poll_once().await.context("Failed to poll sensors")?;
        sleep(SETTLE).await;
        if !environment.is_active() {
            bail!("Board disconnected");
        }

        let readings = environment.readings();
        let content = match format {
            OutputFormat::Json => opts.as_json(&readings)?,
            OutputFormat::Text if printed > 0 => {
                format!("\n{}", format_environment_text(&readings, opts))
            }
            OutputFormat::Text => format_environment_text(&readings, opts),
        };
        write_output(out, &content)?;
        printed += 1;
    }

    manager.disconnect(&device.id).await.ok();
    Ok(())
}
