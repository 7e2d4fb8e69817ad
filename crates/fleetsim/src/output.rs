//! Output formatting: table, JSON, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! device id per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use fleetsim_core::{ConnectionState, DeviceSummary};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color ────────────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

fn paint_state(state: ConnectionState, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        ConnectionState::Connected => label.green().to_string(),
        ConnectionState::Connecting => label.yellow().to_string(),
        ConnectionState::Disconnected => label.dimmed().to_string(),
        ConnectionState::Failed => label.red().bold().to_string(),
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Device")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Sent")]
    sent: u64,
    #[tabled(rename = "Errors")]
    send_errors: u64,
    #[tabled(rename = "Received")]
    received: u64,
    #[tabled(rename = "Reconnects")]
    reconnects: u64,
    #[tabled(rename = "Skipped")]
    skipped_ticks: u64,
    #[tabled(rename = "Last error")]
    last_error: String,
}

impl SummaryRow {
    fn new(summary: &DeviceSummary, color: bool) -> Self {
        Self {
            name: summary.name.clone(),
            state: paint_state(summary.state, color),
            interval: format!("{}ms", summary.interval.as_millis()),
            sent: summary.stats.sent,
            send_errors: summary.stats.send_errors,
            received: summary.stats.received,
            reconnects: summary.stats.reconnects,
            skipped_ticks: summary.stats.skipped_ticks,
            last_error: summary.stats.last_error.clone().unwrap_or_default(),
        }
    }
}

/// One roster entry as `fleetsim roster` reports it. Never carries key
/// material, only where the key comes from.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct RosterRow {
    #[tabled(rename = "Device")]
    pub id: String,
    #[tabled(rename = "Generator")]
    pub generator: String,
    #[tabled(rename = "Key source")]
    pub key_source: String,
}

// ── Renderers ────────────────────────────────────────────────────────

pub fn render_summary(
    format: OutputFormat,
    summaries: &[DeviceSummary],
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<SummaryRow> = summaries
                .iter()
                .map(|s| SummaryRow::new(s, color))
                .collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(summaries)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(summaries)?),
        OutputFormat::Plain => Ok(summaries
            .iter()
            .map(|s| format!("{} {} {}", s.name, s.state, s.stats.sent))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

pub fn render_roster(format: OutputFormat, rows: &[RosterRow]) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => Ok(render_table(rows)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(rows)?),
        OutputFormat::Plain => Ok(rows
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
