//! kitvm - manage a hyperkit virtual machine from the command line.
//!
//! Each machine lives in `<store>/<machine>/`, next to its `config.json`.
//! Driver operations block; they run on tokio's blocking pool so that Ctrl-C
//! can abort a long wait for boot, DHCP or shutdown.

mod cli;
mod store;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use kitvm_driver::{DriverError, DriverSettings, MachineConfig, MachineDriver};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries command output
    init_tracing(&cli.log_level);

    let settings = DriverSettings::from_env();
    tracing::debug!(?settings, "Driver settings loaded");

    let machine_dir = store::machine_dir(&cli.store, &cli.machine);
    let machine = cli.machine.clone();
    let command = cli.command;
    let operation = tokio::task::spawn_blocking(move || run(command, &machine, machine_dir, settings));

    let result = tokio::select! {
        joined = operation => joined.context("driver task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, the machine may be left in an intermediate state");
            // the runtime would otherwise wait for the blocking poll loop
            std::process::exit(130);
        }
    };

    if let Err(e) = &result {
        if let Some(hint) = hint_for(e) {
            tracing::warn!("{hint}");
        }
    }
    result
}

/// Follow-up advice for failures the operator can act on.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<DriverError>()? {
        DriverError::GracefulShutdownFailed => {
            Some("the machine is still running, `kitvm kill` stops it immediately")
        }
        e if e.is_timeout() => {
            Some("the wait timed out, check `kitvm status` and hyperkit.log in the machine directory")
        }
        _ => None,
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(
    command: Command,
    machine: &str,
    machine_dir: PathBuf,
    settings: DriverSettings,
) -> anyhow::Result<()> {
    let open = |settings: DriverSettings| -> anyhow::Result<MachineDriver> {
        let config = store::load(&machine_dir)?;
        Ok(MachineDriver::with_system_backends(config, settings))
    };

    match command {
        Command::Create(args) => {
            let config = args.into_config(machine, machine_dir.clone(), &settings);
            config.validate()?;
            store::save(&config)?;

            let mut driver = MachineDriver::with_system_backends(config, settings);
            driver.pre_create_check()?;
            let created = driver.create();
            // keep whatever the start got to, including a resolved IP
            store::save(driver.config())?;
            created?;
            println!("{machine} created");
        }
        Command::Start => {
            let mut driver = open(settings)?;
            driver.start()?;
            store::save(driver.config())?;
            println!("{machine} started");
        }
        Command::Stop => {
            open(settings)?.stop()?;
            println!("{machine} stopped");
        }
        Command::Kill => {
            open(settings)?.kill()?;
            println!("{machine} killed");
        }
        Command::Remove => {
            open(settings)?.remove()?;
            store::purge(&machine_dir)?;
            println!("{machine} removed");
        }
        Command::Restart => {
            let mut driver = open(settings)?;
            driver.restart()?;
            store::save(driver.config())?;
            println!("{machine} restarted");
        }
        Command::Status => {
            println!("{}", open(settings)?.state_or_error());
        }
        Command::Ip => {
            let driver = open(settings)?;
            let ip = driver
                .ssh_hostname()
                .with_context(|| format!("no IP address recorded for {machine}"))?;
            println!("{ip}");
        }
        Command::UpdateConfig { file } => {
            let mut driver = open(settings)?;
            let raw = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let candidate: MachineConfig = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            store::ensure_same_machine(driver.config(), &candidate)?;
            driver.update_config_raw(&raw)?;
            driver.config().validate()?;
            store::save(driver.config())?;
            println!("{machine} configuration updated");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_for_stuck_shutdown() {
        let err = anyhow::Error::from(DriverError::GracefulShutdownFailed);
        assert!(hint_for(&err).unwrap().contains("kitvm kill"));
    }

    #[test]
    fn test_hint_for_start_timeout() {
        let err = anyhow::Error::from(DriverError::VmFailedToStart(Box::new(
            DriverError::NotRunningYet,
        )));
        assert!(hint_for(&err).unwrap().contains("kitvm status"));
    }

    #[test]
    fn test_no_hint_for_other_errors() {
        assert_eq!(hint_for(&anyhow::Error::from(DriverError::NotImplemented)), None);
        assert_eq!(hint_for(&anyhow::anyhow!("machine config not found")), None);
    }
}
