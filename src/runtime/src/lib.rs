//! Localnet Runtime - isolated local cluster implementation.
//!
//! This crate builds the Linux side of a local cluster: the private network
//! namespace, bridge and TAP plumbing, the ephemeral services that run in
//! the namespace, and the [`LocalCluster`] that ties them together.

#![allow(clippy::result_large_err)]

pub mod cluster;
pub mod command;
pub mod host_check;
pub mod netns;
pub mod network;
pub mod retry;
pub mod services;
pub mod teardown;

// Re-export common types
pub use cluster::{ClusterState, LocalCluster};
pub use command::{ClusterCommand, CommandOutput};
pub use host_check::{check_host, find_executable, Prerequisite};
pub use netns::{NetNs, NsGuard, NsId};
pub use network::{LinkSocket, TapConfig, VirtualInterface};
pub use retry::retry;
pub use services::{Dnsmasq, Service, SimpleEtcd, SshAgent};
pub use teardown::Teardown;

/// Localnet Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable carrying the coordination store endpoint into
/// commands started by the CLI.
pub const COORDINATION_ENDPOINT_ENV: &str = "LOCALNET_COORDINATION_ENDPOINT";
