//! `localnet check` command.

use clap::Args;
use localnet_core::ClusterConfig;
use localnet_runtime::check_host;

use crate::output::{new_table, status_label};

#[derive(Args)]
pub struct CheckArgs;

pub fn execute(_args: CheckArgs, config: &ClusterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let checks = check_host(config);

    let mut table = new_table(&["CHECK", "STATUS", "DETAILS"]);
    for check in &checks {
        table.add_row(vec![
            check.name.as_str(),
            status_label(check.satisfied),
            check.details.as_str(),
        ]);
    }
    println!("{table}");

    let missing = checks.iter().filter(|c| !c.satisfied).count();
    if missing > 0 {
        return Err(format!("{missing} host prerequisite(s) missing").into());
    }
    Ok(())
}
