//! `localnet config` command.

use clap::Args;
use localnet_core::ClusterConfig;

#[derive(Args)]
pub struct ConfigArgs;

pub fn execute(_args: ConfigArgs, config: &ClusterConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
