//! Clap derive structures for the `fleetsim` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use fleetsim_api::Protocol;
use fleetsim_core::GeneratorKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetsim -- simulate fleets of IoT telemetry devices
#[derive(Debug, Parser)]
#[command(
    name = "fleetsim",
    version,
    about = "Simulate fleets of IoT telemetry devices publishing to a message hub",
    long_about = "Drives many independent simulated devices concurrently. Each device\n\
        connects to the hub, publishes a synthetic reading on a jittered\n\
        interval, and reconnects automatically when the hub drops it.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, env = "FLEETSIM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(fleetsim_config::config_path)
    }
}

// ── Output & Logging Enums ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one device id per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the fleet until Ctrl-C or --duration elapses
    Run(RunArgs),

    /// Validate the config and list the device roster
    #[command(alias = "ls")]
    Roster,

    /// Manage the config file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stop after this long (e.g. "30s", "5m"); runs until Ctrl-C otherwise
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Simulate N devices (device1000, device1001, ...) instead of the
    /// configured roster
    #[arg(long, short = 'n')]
    pub devices: Option<usize>,

    /// Run only these roster devices (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Hub name (overrides config)
    #[arg(long)]
    pub hub: Option<String>,

    /// Transport protocol (overrides config)
    #[arg(long)]
    pub protocol: Option<Protocol>,

    /// Reading generator for every device (overrides config)
    #[arg(long, short = 'g')]
    pub generator: Option<GeneratorKind>,

    /// Base publish interval (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub frequency: Option<Duration>,

    /// Seed jitter and generators for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Probability (0.0-1.0) that the in-memory hub drops a device after
    /// each accepted send
    #[arg(long, default_value_t = 0.0)]
    pub drop_rate: f64,

    /// Log every send status at info level
    #[arg(long)]
    pub send_status: bool,

    /// How long to wait for the fleet to connect before reporting
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Abort unless every device connects within --connect-timeout
    #[arg(long)]
    pub require_connected: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the effective config (file + environment), keys redacted
    Show,

    /// Write a starter config with the reference roster
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
