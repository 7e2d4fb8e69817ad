//! Subcommand handlers.

pub mod config_cmd;
pub mod roster;
pub mod run;

use std::path::PathBuf;

use fleetsim_config::{Config, load_config_from};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the effective config (defaults, file, environment) for `global`.
pub(crate) fn load(global: &GlobalOpts) -> Result<(PathBuf, Config), CliError> {
    let path = global.config_path();
    let cfg = load_config_from(&path).map_err(|e| CliError::from_config(e, &path))?;
    tracing::debug!(path = %path.display(), devices = cfg.devices.len(), "config loaded");
    Ok((path, cfg))
}
