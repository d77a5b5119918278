//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Board name, identifier or alias, or use THUNDERBOARD_DEVICE env var
    #[arg(short, long, env = "THUNDERBOARD_DEVICE")]
    pub device: Option<String>,

    /// Connection timeout in seconds (overrides config)
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

#[derive(Parser)]
#[command(name = "thunderboard")]
#[command(author, version, about = "CLI for Thunderboard demo boards", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby Thunderboards
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Connect to a board and display its identity
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Run the I/O demo: watch buttons or switch an LED
    Io {
        #[command(flatten)]
        device: DeviceArgs,

        /// LED index to switch
        #[arg(long, requires = "state")]
        led: Option<usize>,

        /// Switch the LED on
        #[arg(long, group = "state", requires = "led")]
        on: bool,

        /// Switch the LED off
        #[arg(long, group = "state", requires = "led")]
        off: bool,
    },

    /// Run the environment demo and print readings
    Environment {
        #[command(flatten)]
        device: DeviceArgs,

        /// Number of readings to print (0 runs until interrupted)
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Run the motion demo: stream orientation or send a command
    Motion {
        #[command(flatten)]
        device: DeviceArgs,

        /// Calibrate the accelerometer
        #[arg(long, group = "action")]
        calibrate: bool,

        /// Zero the orientation
        #[arg(long, group = "action")]
        reset_orientation: bool,

        /// Zero the wheel revolution counter
        #[arg(long, group = "action")]
        reset_revolutions: bool,

        /// Number of samples to print when streaming (0 runs until interrupted)
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Manage board aliases (friendly names)
    Alias {
        #[command(subcommand)]
        action: AliasSubcommand,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Alias subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum AliasSubcommand {
    /// List all board aliases
    List,

    /// Set a board alias
    Set {
        /// Friendly name for the board (e.g., "desk", "bike")
        name: String,

        /// Board name or identifier, as printed by `thunderboard scan`
        device: String,
    },

    /// Remove a board alias
    #[command(alias = "rm")]
    Remove {
        /// Alias name to remove
        name: String,
    },
}
