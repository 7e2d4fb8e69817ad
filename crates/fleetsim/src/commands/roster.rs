//! `fleetsim roster`: validate the config and list devices.

use fleetsim_config::DeviceEntry;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, RosterRow};

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (path, cfg) = super::load(global)?;
    cfg.validate().map_err(|e| CliError::from_config(e, &path))?;

    let rows: Vec<RosterRow> = cfg
        .devices
        .iter()
        .map(|device| RosterRow {
            id: device.id.clone(),
            generator: device.generator.unwrap_or(cfg.generator).to_string(),
            key_source: key_source(device),
        })
        .collect();

    let rendered = output::render_roster(global.output, &rows)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// Where the device's key would come from, in resolution order. The
/// keyring is not queried here.
fn key_source(device: &DeviceEntry) -> String {
    if let Some(var) = &device.key_env {
        if std::env::var_os(var).is_some() {
            return format!("env {var}");
        }
    }
    if device.key.is_some() {
        return "config key".into();
    }
    if device.connection_string.is_some() {
        return "config connection string".into();
    }
    match &device.key_env {
        Some(var) => format!("keyring ({var} unset)"),
        None => "keyring".into(),
    }
}
