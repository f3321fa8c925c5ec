//! CLI command implementations
//!
//! Commands print one JSON response on stdout and return an error (and a
//! non-zero exit) on failure.

use std::path::Path;

use serde_json::{json, Value};

use crate::config::ReplicationConfig;
use crate::observability::{log_event, Event, Logger, Severity};
use crate::simulation::{run_simulation, SimulationOptions, SimulationReport};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let severity = Severity::parse(&cli.log_level).ok_or_else(|| {
        CliError::config_error(format!("Unknown log level: {}", cli.log_level))
    })?;
    Logger::set_min_severity(severity);
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::CheckConfig { config } => write_response(check_config(&config)?),
        Command::Simulate {
            config,
            nodes,
            owners,
            writes,
            crash_node,
            seed,
        } => {
            let config = load_config(config.as_deref())?;
            let options = SimulationOptions {
                nodes,
                owners,
                writes,
                crash_node,
                seed,
                config,
            };
            write_response(simulate(&options)?)
        }
    }
}

/// Load and validate a configuration file
pub fn check_config(path: &Path) -> CliResult<Value> {
    let config = ReplicationConfig::load(path)?;
    log_event(
        Event::ConfigLoaded,
        &[("path", &path.display().to_string())],
    );
    Ok(json!({
        "valid": true,
        "config": serde_json::to_value(&config)?,
    }))
}

/// Run a simulation on a fresh runtime and report it.
///
/// A run whose owners disagree at the end is an error.
pub fn simulate(options: &SimulationOptions) -> CliResult<Value> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    let report: SimulationReport = runtime.block_on(run_simulation(options))?;
    if !report.consistent {
        return Err(CliError::simulation_failed(format!(
            "owners disagree after {} writes",
            report.writes
        )));
    }
    Ok(serde_json::to_value(&report)?)
}

fn load_config(path: Option<&Path>) -> CliResult<ReplicationConfig> {
    match path {
        Some(path) => {
            let config = ReplicationConfig::load(path)?;
            log_event(
                Event::ConfigLoaded,
                &[("path", &path.display().to_string())],
            );
            Ok(config)
        }
        None => Ok(ReplicationConfig::default()),
    }
}
