//! `localnet run` command: cluster up, run a program inside it, cluster down.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use clap::Args;
use localnet_core::ClusterConfig;
use localnet_runtime::{LocalCluster, COORDINATION_ENDPOINT_ENV};

/// Delay between coordination store probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct RunArgs {
    /// Guest bridge the coordination endpoint is resolved on
    #[arg(long)]
    pub bridge: Option<String>,

    /// Seconds to wait for the coordination store to accept connections
    #[arg(long, default_value = "30")]
    pub wait: u64,

    /// Environment variable (KEY=VALUE), can be repeated
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Program to run and its arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub fn execute(args: RunArgs, mut config: ClusterConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref bridge) = args.bridge {
        config.guest_bridge = bridge.clone();
    }
    let env = parse_env_vars(&args.env)?;

    let mut cluster = LocalCluster::start(config)?;
    eprintln!("Cluster {} ready", cluster.id());

    let outcome = run_in_cluster(&cluster, &args, &env);
    let destroyed = cluster.destroy();

    let status = outcome?;
    destroyed?;

    let code = exit_code(status);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run_in_cluster(
    cluster: &LocalCluster,
    args: &RunArgs,
    env: &[(String, String)],
) -> Result<ExitStatus, Box<dyn std::error::Error>> {
    let attempts = attempts_for(args.wait);
    cluster.wait_for_coordination_store(attempts, PROBE_INTERVAL)?;

    let endpoint = cluster.coordination_endpoint()?;
    let (program, program_args) = args
        .command
        .split_first()
        .ok_or("no program given")?;

    tracing::info!(program = %program, endpoint = %endpoint, "Running program in cluster");

    let status = cluster
        .new_command(program)?
        .args(program_args)
        .env(COORDINATION_ENDPOINT_ENV, endpoint.to_string())
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .status()?;
    Ok(status)
}

/// Number of probes that fit in `wait_secs`, at least one.
fn attempts_for(wait_secs: u64) -> u32 {
    let per_second = (1000 / PROBE_INTERVAL.as_millis()) as u64;
    wait_secs
        .saturating_mul(per_second)
        .clamp(1, u64::from(u32::MAX)) as u32
}

/// Shell-style exit code: the program's code, or 128 + signal number.
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Parse KEY=VALUE pairs, keeping their order.
fn parse_env_vars(vars: &[String]) -> Result<Vec<(String, String)>, String> {
    vars.iter()
        .map(|var| {
            var.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("Invalid environment variable (expected KEY=VALUE): {var}"))
        })
        .collect()
}
