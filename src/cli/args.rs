//! CLI argument definitions using clap
//!
//! Commands:
//! - aerocache check-config --config <path>
//! - aerocache simulate --nodes N --owners K --writes W [--crash-node I] [--seed S]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AeroCache - triangle write path of a replicated in-memory cache
#[derive(Parser, Debug)]
#[command(name = "aerocache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity (trace, info, warn, error, fatal)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./aerocache.json")]
        config: PathBuf,
    },

    /// Run a random workload against an in-process cluster
    Simulate {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cluster size
        #[arg(long, default_value_t = 4)]
        nodes: usize,

        /// Owners per segment, primary included
        #[arg(long, default_value_t = 2)]
        owners: usize,

        /// Writes to issue
        #[arg(long, default_value_t = 1000)]
        writes: usize,

        /// Member to crash half-way through the run
        #[arg(long)]
        crash_node: Option<usize>,

        /// Workload seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "aerocache",
            "simulate",
            "--nodes",
            "5",
            "--owners",
            "3",
            "--writes",
            "10",
            "--crash-node",
            "2",
        ])
        .unwrap();

        match cli.command {
            Command::Simulate {
                nodes,
                owners,
                writes,
                crash_node,
                seed,
                config,
            } => {
                assert_eq!((nodes, owners, writes), (5, 3, 10));
                assert_eq!(crash_node, Some(2));
                assert_eq!(seed, 0);
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_config_default_path() {
        let cli = Cli::try_parse_from(["aerocache", "check-config"]).unwrap();
        assert_eq!(cli.log_level, "warn");
        assert!(matches!(
            cli.command,
            Command::CheckConfig { config } if config == PathBuf::from("./aerocache.json")
        ));
    }
}
