use crate::cli::{Cli, Command};
use anyhow::{Context, Result};
use fsprov_error::ProvisionError;
use fsprov_hal::LinuxHal;
use fsprov_workflow::crypt::{CryptHandler, CryptRequest};
use fsprov_workflow::packages::ShellPackageManager;
use fsprov_workflow::persist::write_json_atomic;
use fsprov_workflow::preflight::{self, PreflightConfig};
use fsprov_workflow::size::Size;
use fsprov_workflow::snapshot::{SnapshotRequest, SnapshotStore};
use fsprov_workflow::tasks::build_plan;
use fsprov_workflow::{load_config, run_pools, TaskOptions};
use log::info;
use serde_json::Value;
use std::path::Path;

pub fn run(cli: &Cli) -> Result<()> {
    let check = cli.check;
    match &cli.command {
        Command::Apply {
            config,
            yes_i_know,
            report,
        } => apply(config, *yes_i_know, report.as_deref(), check),
        Command::Plan { config } => {
            let cfg = load_config(config)?;
            print!("{}", build_plan(&cfg.pools));
            Ok(())
        }
        Command::Preflight { config } => {
            let cfg = load_config(config)?;
            preflight::run(&PreflightConfig::for_pools(&cfg.pools, check))
        }
        Command::Size { size } => {
            let size = Size::parse(size)?;
            print_json(&serde_json::to_value(size.report())?)
        }
        Command::Crypt {
            device,
            state,
            open,
            name,
            key,
            new_key,
            remove_key,
            yes_i_know,
        } => {
            let req = CryptRequest {
                device: device.clone(),
                state: (*state).into(),
                open: *open,
                name: name.clone(),
                key: key.clone(),
                new_key: new_key.clone(),
                remove_key: remove_key.clone(),
            };
            let hal = LinuxHal::new();
            let outcome =
                CryptHandler::new(&hal, TaskOptions::new(check, *yes_i_know)).apply(&req)?;
            print_json(&serde_json::to_value(outcome)?)
        }
        Command::Snapshot {
            gather,
            compare_1,
            compare_2,
            store,
        } => {
            let req = SnapshotRequest {
                gather: gather.clone(),
                compare_1: compare_1.clone(),
                compare_2: compare_2.clone(),
            };
            req.validate()?;
            let mut store = SnapshotStore::load(store)?;
            let hal = LinuxHal::new();
            match req.run(&hal, &mut store)? {
                Some(result) => print_json(&serde_json::to_value(result)?),
                None => Ok(()),
            }
        }
    }
}

fn apply(config: &Path, yes_i_know: bool, report: Option<&Path>, check: bool) -> Result<()> {
    if !check && !yes_i_know {
        return Err(ProvisionError::MissingConfirmation.into());
    }
    let cfg = load_config(config)?;
    info!(
        "Applying {} volume(s) from {}{}",
        cfg.volume_count(),
        config.display(),
        if check { " (check mode)" } else { "" }
    );

    let hal = LinuxHal::new();
    let packages = ShellPackageManager::new(cfg.package_manager, &hal, check);
    let result = run_pools(
        &hal,
        &packages,
        &cfg.pools,
        TaskOptions::new(check, yes_i_know),
    )?;

    for line in result.summary_lines() {
        println!("{line}");
    }
    if let Some(path) = report {
        write_json_atomic(path, &result)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
