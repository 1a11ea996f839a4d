//! Localnet Core - shared types for the isolated local test network.
//!
//! Errors, cluster configuration and the bridge segment model used by the
//! runtime crate and the CLI. Nothing in here touches the OS.

pub mod config;
pub mod error;
pub mod segment;

// Re-export commonly used types
pub use config::{ClusterConfig, DnsmasqConfig, EtcdConfig, SshAgentConfig};
pub use error::{LocalnetError, Result};
pub use segment::{Interface, Ipv4Cidr, Ipv6Cidr, MacAddr, Segment, Segments};

/// Localnet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
