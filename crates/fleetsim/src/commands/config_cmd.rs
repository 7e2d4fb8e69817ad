//! Config subcommand handlers.

use fleetsim_config::{Config, render_config, save_config_to};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&global.config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let (_, cfg) = super::load(global)?;
            output::print_output(render_config(&cfg)?.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = global.config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config_to(&Config::reference(), &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
                eprintln!("Set DEVICE1000_KEY .. DEVICE1010_KEY, or store keys in the keyring.");
            }
            Ok(())
        }
    }
}
