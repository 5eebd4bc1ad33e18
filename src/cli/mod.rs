// CLI module - Foreground supervisor and config checks

mod output;

use crate::config::{EcosystemConfig, ProcessSpec};
use crate::error::{Result, WardenError};
use crate::process::{ProcessManager, SupervisorConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::info;

/// Warden - keeps your processes running
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the apps of an ecosystem file until interrupted
    Run {
        /// Path to the ecosystem file (.toml or .json)
        config: PathBuf,

        /// Only run the named apps (repeatable)
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,

        /// Directory for default log files
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Memory sampling interval in milliseconds
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
        monitor_interval_ms: u64,
    },

    /// Check an ecosystem file and print the parsed apps
    Validate {
        /// Path to the ecosystem file (.toml or .json)
        config: PathBuf,

        /// Print the normalized apps as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(self) -> Result<()> {
        match self.command {
            Commands::Validate { config, json } => validate(&config, json),

            Commands::Run {
                config,
                only,
                log_dir,
                monitor_interval_ms,
            } => {
                let mut supervisor = SupervisorConfig {
                    monitor_interval: Duration::from_millis(monitor_interval_ms),
                    ..SupervisorConfig::default()
                };
                if let Some(dir) = log_dir {
                    supervisor.log_dir = dir;
                }

                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(run_foreground(&config, &only, supervisor))
            }
        }
    }
}

/// Parse, report rejected entries, print the accepted ones
fn validate(path: &Path, json: bool) -> Result<()> {
    let ecosystem = EcosystemConfig::from_file(path)?;

    if json {
        println!("{}", ecosystem.to_json_string()?);
    } else {
        output::print_spec_table(&ecosystem.specs);
    }

    report_rejected(&ecosystem);

    if ecosystem.rejected.is_empty() {
        if !json {
            output::print_success_msg(&format!(
                "{} app(s) valid in {}",
                ecosystem.specs.len(),
                path.display()
            ));
        }
        Ok(())
    } else {
        Err(WardenError::ConfigValidationError(format!(
            "{} of {} app(s) rejected",
            ecosystem.rejected.len(),
            ecosystem.rejected.len() + ecosystem.specs.len()
        )))
    }
}

fn report_rejected(ecosystem: &EcosystemConfig) {
    for rejected in &ecosystem.rejected {
        output::print_error(&format!("{}: {}", rejected.label, rejected.error));
    }
}

/// Keep only the apps named with `--only`; every name must exist
fn select_specs(specs: Vec<ProcessSpec>, only: &[String]) -> Result<Vec<ProcessSpec>> {
    if only.is_empty() {
        return Ok(specs);
    }

    if let Some(missing) = only
        .iter()
        .find(|name| !specs.iter().any(|spec| &spec.name == *name))
    {
        return Err(WardenError::ProcessNotFound(missing.clone()));
    }

    Ok(specs
        .into_iter()
        .filter(|spec| only.contains(&spec.name))
        .collect())
}

async fn run_foreground(path: &Path, only: &[String], config: SupervisorConfig) -> Result<()> {
    let ecosystem = EcosystemConfig::from_file(path)?;
    report_rejected(&ecosystem);

    let specs = select_specs(ecosystem.specs, only)?;
    if specs.is_empty() {
        return Err(WardenError::InvalidConfig(format!(
            "{}: no valid apps to run",
            path.display()
        )));
    }

    info!("Logs go to {}", config.log_dir.display());
    let mut manager = ProcessManager::new(config);

    for (name, e) in manager.load(specs) {
        output::print_error(&format!("{}: {}", name, e));
    }
    for (name, e) in manager.start_all().await {
        output::print_error(&format!("{}: {}", name, e));
    }

    output::print_status_table(&manager.list());
    output::print_info("Supervising, press Ctrl+C to stop");

    wait_for_shutdown_signal().await?;

    let pb = output::create_progress_bar("Stopping processes...");
    let statuses = manager.shutdown().await;
    if statuses.iter().all(|s| s.pid.is_none()) {
        output::finish_progress_success(pb, "All processes stopped");
    } else {
        output::finish_progress_error(pb, "Some processes did not stop");
    }

    output::print_status_table(&statuses);
    Ok(())
}

/// Resolve on SIGTERM or SIGINT
async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}
