//! `fleetsim run`: drive the fleet against the in-process hub.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fleetsim_api::MemoryHub;
use fleetsim_config::{Config, to_fleet_config};
use fleetsim_core::{ConnectionState, Fleet};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (path, cfg) = super::load(global)?;
    let cfg = apply_overrides(cfg, args)?;
    let fleet_config = to_fleet_config(&cfg).map_err(|e| CliError::from_config(e, &path))?;

    let hub = MemoryHub::for_hub(format!("{}.{}", cfg.hub_name, cfg.host_suffix));
    hub.set_drop_rate(args.drop_rate);

    let fleet = Fleet::new(&fleet_config, Arc::new(hub))?;
    fleet.start();

    match fleet.wait_connected(args.connect_timeout).await {
        Ok(()) => {}
        Err(err) if args.require_connected => {
            fleet.shutdown();
            return Err(err.into());
        }
        Err(err) => warn!(error = %err, "fleet did not fully connect"),
    }

    wait_for_stop(args.duration).await?;
    // Snapshot before shutdown moves every device to disconnected.
    let summaries = fleet.summary();
    fleet.shutdown();

    let color = output::should_color(global.color);
    let rendered = output::render_summary(global.output, &summaries, color)?;
    output::print_output(&rendered, global.quiet);

    if summaries
        .iter()
        .all(|s| s.state == ConnectionState::Failed)
    {
        return Err(CliError::AllDevicesFailed {
            count: summaries.len(),
        });
    }
    Ok(())
}

/// Fold command-line overrides into the loaded config.
fn apply_overrides(mut cfg: Config, args: &RunArgs) -> Result<Config, CliError> {
    if !(0.0..=1.0).contains(&args.drop_rate) {
        return Err(CliError::Usage {
            field: "--drop-rate".into(),
            reason: format!("{} is outside 0.0..=1.0", args.drop_rate),
        });
    }

    if let Some(count) = args.devices {
        if count == 0 {
            return Err(CliError::Usage {
                field: "--devices".into(),
                reason: "must be at least 1".into(),
            });
        }
        cfg = cfg.with_synthetic_roster(count);
    }
    if !args.only.is_empty() {
        if let Some(missing) = args
            .only
            .iter()
            .find(|id| !cfg.devices.iter().any(|d| &d.id == *id))
        {
            return Err(CliError::NotFound {
                identifier: missing.clone(),
            });
        }
        cfg.devices.retain(|d| args.only.contains(&d.id));
    }
    if let Some(hub) = &args.hub {
        cfg.hub_name.clone_from(hub);
    }
    if let Some(protocol) = args.protocol {
        cfg.protocol = protocol;
    }
    if let Some(generator) = args.generator {
        cfg.generator = generator;
        for device in &mut cfg.devices {
            device.generator = None;
        }
    }
    if let Some(frequency) = args.frequency {
        cfg.frequency_ms = u64::try_from(frequency.as_millis()).unwrap_or(u64::MAX);
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    cfg.send_status |= args.send_status;
    Ok(cfg)
}

/// Block until Ctrl-C, or until `duration` elapses when one is given.
async fn wait_for_stop(duration: Option<Duration>) -> Result<(), CliError> {
    match duration {
        Some(duration) => {
            info!(duration = %humantime::format_duration(duration), "running");
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("interrupted");
                }
                () = tokio::time::sleep(duration) => {}
            }
        }
        None => {
            info!("running until Ctrl-C");
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use fleetsim_core::GeneratorKind;

    use crate::cli::{Cli, Command};

    fn run_args(argv: &[&str]) -> RunArgs {
        let argv = ["fleetsim", "run"].iter().chain(argv).copied();
        match Cli::try_parse_from(argv).map(|cli| cli.command) {
            Ok(Command::Run(args)) => args,
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn synthetic_roster_replaces_configured_devices() {
        let cfg = apply_overrides(Config::reference(), &run_args(&["--devices", "3"]));
        let Ok(cfg) = cfg else {
            panic!("overrides rejected");
        };
        assert_eq!(cfg.devices.len(), 3);
        assert!(cfg.devices.iter().all(|d| d.key.is_some()));
    }

    #[test]
    fn generator_flag_clears_per_device_overrides() {
        let mut base = Config::default().with_synthetic_roster(2);
        base.devices[1].generator = Some(GeneratorKind::Temperature);
        let Ok(cfg) = apply_overrides(base, &run_args(&["-g", "uniform", "--seed", "9"])) else {
            panic!("overrides rejected");
        };
        assert_eq!(cfg.generator, GeneratorKind::Uniform);
        assert!(cfg.devices.iter().all(|d| d.generator.is_none()));
        assert_eq!(cfg.seed, Some(9));
    }

    #[test]
    fn only_narrows_the_roster_in_order() {
        let args = run_args(&["--only", "device1004,device1001"]);
        let Ok(cfg) = apply_overrides(Config::reference(), &args) else {
            panic!("overrides rejected");
        };
        let ids: Vec<_> = cfg.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["device1001", "device1004"]);
    }

    #[test]
    fn only_with_unknown_device_is_not_found() {
        let args = run_args(&["--devices", "2", "--only", "device1005"]);
        match apply_overrides(Config::default(), &args) {
            Err(CliError::NotFound { identifier }) => assert_eq!(identifier, "device1005"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_inputs_are_usage_errors() {
        let bad_rate = apply_overrides(Config::default(), &run_args(&["--drop-rate", "1.5"]));
        assert!(matches!(bad_rate, Err(CliError::Usage { .. })));

        let no_devices = apply_overrides(Config::default(), &run_args(&["--devices", "0"]));
        assert!(matches!(no_devices, Err(CliError::Usage { .. })));
    }
}
