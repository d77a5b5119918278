//! Command-line interface for Thunderboard React and Sense boards.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby boards |
//! | `info` | Display board identity and capabilities |
//! | `io` | Watch the buttons or switch an LED |
//! | `environment` | Print environmental sensor readings |
//! | `motion` | Stream orientation or calibrate and reset |
//! | `alias` | Manage friendly board names |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! Settings live in `config.toml` under the platform config directory
//! (`~/.config/thunderboard/config.toml` on Linux):
//!
//! - `device`: default board name or identifier
//! - `timeout`: connection timeout in seconds
//! - `poll_interval`: environment polling interval in seconds
//! - `[aliases]`: friendly names for boards
//!
//! `THUNDERBOARD_DEVICE` sets the board when `--device` is absent.

mod cli;
mod commands;
mod config;
mod format;
mod util;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use thunderboard_core::{BleManager, ManagerConfig};
use tracing_subscriber::EnvFilter;

use crate::cli::{AliasSubcommand, Cli, Commands, DeviceArgs};
use crate::commands::{AliasAction, LedCommand, MotionAction};
use crate::config::{Config, require_device};
use crate::format::FormatOptions;

async fn start_manager(config: ManagerConfig) -> Result<BleManager> {
    let manager = BleManager::bluetooth(config).await?;
    manager.start().await?;
    Ok(manager)
}

/// Resolve the board and build a started manager for a device command.
async fn device_session(args: DeviceArgs, config: &Config) -> Result<(BleManager, String)> {
    let identifier = require_device(args.device, config)?;
    let manager_config = ManagerConfig::default().connection(config.connection_config(args.timeout)?);
    Ok((start_manager(manager_config).await?, identifier))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "thunderboard", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let no_color = cli.no_color || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
    let opts = FormatOptions::new(no_color, cli.compact);
    let format = cli.format;
    let mut out = io::stdout();

    match cli.command {
        Commands::Scan { timeout } => {
            let manager_config = ManagerConfig::default()
                .connection(config.connection_config(None)?)
                .scan_duration(Duration::from_secs(timeout));
            let manager = start_manager(manager_config).await?;
            commands::cmd_scan(&manager, format, &opts, &config.aliases, &mut out).await?;
        }
        Commands::Info { device } => {
            let (manager, identifier) = device_session(device, &config).await?;
            commands::cmd_info(&manager, &identifier, format, &opts, &mut out).await?;
        }
        Commands::Io {
            device,
            led,
            on,
            off: _,
        } => {
            let (manager, identifier) = device_session(device, &config).await?;
            let led = led.map(|index| LedCommand { index, on });
            commands::cmd_io(&manager, &identifier, led, format, &opts, &mut out).await?;
        }
        Commands::Environment { device, count } => {
            let (manager, identifier) = device_session(device, &config).await?;
            commands::cmd_environment(&manager, &identifier, count, format, &opts, &mut out)
                .await?;
        }
        Commands::Motion {
            device,
            calibrate,
            reset_orientation,
            reset_revolutions,
            count,
        } => {
            let action = if calibrate {
                Some(MotionAction::Calibrate)
            } else if reset_orientation {
                Some(MotionAction::ResetOrientation)
            } else if reset_revolutions {
                Some(MotionAction::ResetRevolutions)
            } else {
                None
            };
            let (manager, identifier) = device_session(device, &config).await?;
            commands::cmd_motion(&manager, &identifier, action, count, format, &opts, &mut out)
                .await?;
        }
        Commands::Alias { action } => {
            let action = match action {
                AliasSubcommand::List => AliasAction::List,
                AliasSubcommand::Set { name, device } => AliasAction::Set { name, device },
                AliasSubcommand::Remove { name } => AliasAction::Remove { name },
            };
            commands::cmd_alias(action, &Config::path(), cli.quiet, &mut out)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
