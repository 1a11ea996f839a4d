//! CLI command definitions and dispatch.

mod check;
mod config;
mod run;

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use localnet_core::ClusterConfig;

/// Localnet - isolated local clusters for integration tests.
#[derive(Parser)]
#[command(name = "localnet", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Cluster configuration file (YAML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a program inside a fresh local cluster
    Run(run::RunArgs),
    /// Check host prerequisites
    Check(check::CheckArgs),
    /// Print the effective configuration
    Config(config::ConfigArgs),
}

/// Default configuration file (~/.config/localnet/config.yaml).
pub(crate) fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("localnet").join("config.yaml"))
}

/// Load the configuration from `path`, else from the default file if it
/// exists, else built-in defaults.
pub(crate) fn load_config(path: Option<&Path>) -> Result<ClusterConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(ClusterConfig::from_file(path)?);
    }
    match default_config_path() {
        Some(path) if path.exists() => Ok(ClusterConfig::from_file(&path)?),
        _ => Ok(ClusterConfig::default()),
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Check(args) => check::execute(args, &config),
        Command::Config(args) => config::execute(args, &config),
    }
}
