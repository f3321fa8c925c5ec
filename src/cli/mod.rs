//! CLI module for AeroCache
//!
//! Provides command-line interface for:
//! - check-config: Validate a configuration file
//! - simulate: Run a workload against an in-process cluster

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, simulate};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_response;
