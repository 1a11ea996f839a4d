//! Cluster configuration.
//!
//! Every field has a default, so an empty YAML/JSON document (or no file at
//! all) yields a working configuration for a host with `ssh-agent`,
//! `dnsmasq` and `etcd` on `PATH`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LocalnetError, Result};

/// Bridge that guests and the coordination store endpoint live on.
pub const DEFAULT_GUEST_BRIDGE: &str = "br0";

/// Default coordination store client port.
pub const DEFAULT_CLIENT_PORT: u16 = 2379;

/// Default coordination store peer port.
pub const DEFAULT_PEER_PORT: u16 = 2380;

/// Top-level configuration for one local cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Well-known bridge the coordination endpoint is resolved on.
    pub guest_bridge: String,

    /// Parent directory for per-cluster scratch directories
    /// (system temp dir when unset).
    pub state_dir: Option<PathBuf>,

    /// SSH agent settings
    pub ssh_agent: SshAgentConfig,

    /// DHCP/DNS service settings
    pub dnsmasq: DnsmasqConfig,

    /// Coordination store settings
    pub etcd: EtcdConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            guest_bridge: DEFAULT_GUEST_BRIDGE.to_string(),
            state_dir: None,
            ssh_agent: SshAgentConfig::default(),
            dnsmasq: DnsmasqConfig::default(),
            etcd: EtcdConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Load a configuration file. `.json` files are parsed as JSON,
    /// anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            LocalnetError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: ClusterConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&data)?,
            _ => serde_yaml::from_str(&data)?,
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded cluster configuration");
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.guest_bridge.is_empty() {
            return Err(LocalnetError::Config("guest_bridge must not be empty".to_string()));
        }
        // IFNAMSIZ includes the trailing NUL
        if self.guest_bridge.len() >= 16 {
            return Err(LocalnetError::Config(format!(
                "guest_bridge '{}' is longer than 15 bytes",
                self.guest_bridge
            )));
        }
        if self.dnsmasq.segments == 0 {
            return Err(LocalnetError::Config(
                "dnsmasq.segments must be at least 1".to_string(),
            ));
        }
        if self.dnsmasq.interfaces_per_segment < 2 {
            return Err(LocalnetError::Config(
                "dnsmasq.interfaces_per_segment must be at least 2".to_string(),
            ));
        }
        if self.dnsmasq.mtu < 68 {
            return Err(LocalnetError::Config(format!(
                "dnsmasq.mtu {} is below the IPv4 minimum of 68",
                self.dnsmasq.mtu
            )));
        }
        if self.etcd.client_port == 0 || self.etcd.peer_port == 0 {
            return Err(LocalnetError::Config("etcd ports must be non-zero".to_string()));
        }
        if self.etcd.client_port == self.etcd.peer_port {
            return Err(LocalnetError::Config(format!(
                "etcd client and peer ports must differ (both {})",
                self.etcd.client_port
            )));
        }
        Ok(())
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// SSH agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshAgentConfig {
    /// Agent executable
    pub binary: PathBuf,

    /// Executable used to load identities into the agent
    pub add_binary: PathBuf,

    /// Private key files loaded into the agent at start
    pub identities: Vec<PathBuf>,
}

impl Default for SshAgentConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh-agent"),
            add_binary: PathBuf::from("ssh-add"),
            identities: Vec::new(),
        }
    }
}

/// DHCP/DNS service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsmasqConfig {
    /// Daemon executable
    pub binary: PathBuf,

    /// Number of bridge segments (`br0`, `br1`, ...)
    pub segments: u8,

    /// Interfaces per segment, including the bridge's own (index 1).
    /// Larger pools slow down daemon startup.
    pub interfaces_per_segment: u16,

    /// Bridge MTU
    pub mtu: u32,
}

impl Default for DnsmasqConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("dnsmasq"),
            segments: 1,
            interfaces_per_segment: 500,
            mtu: 1500,
        }
    }
}

/// Coordination store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Server executable
    pub binary: PathBuf,

    /// Member name
    pub name: String,

    /// Client listener port (bound on all namespace addresses)
    pub client_port: u16,

    /// Peer listener port (bound on loopback)
    pub peer_port: u16,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("etcd"),
            name: "localnet".to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            peer_port: DEFAULT_PEER_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.guest_bridge, "br0");
        assert!(config.state_dir.is_none());
        assert_eq!(config.ssh_agent.binary, PathBuf::from("ssh-agent"));
        assert_eq!(config.dnsmasq.segments, 1);
        assert_eq!(config.dnsmasq.interfaces_per_segment, 500);
        assert_eq!(config.etcd.client_port, 2379);
        assert_eq!(config.etcd.peer_port, 2380);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: ClusterConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ClusterConfig::default());
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = "guest_bridge: br1\ndnsmasq:\n  segments: 2\netcd:\n  client_port: 12379\n";
        let config: ClusterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.guest_bridge, "br1");
        assert_eq!(config.dnsmasq.segments, 2);
        assert_eq!(config.dnsmasq.interfaces_per_segment, 500);
        assert_eq!(config.etcd.client_port, 12379);
        assert_eq!(config.etcd.peer_port, 2380);
    }

    #[test]
    fn test_from_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, "etcd:\n  name: test-member\n").unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.etcd.name, "test-member");
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, r#"{"ssh_agent": {"identities": ["/tmp/id_ed25519"]}}"#).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(
            config.ssh_agent.identities,
            vec![PathBuf::from("/tmp/id_ed25519")]
        );
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClusterConfig::from_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, LocalnetError::Config(_)));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, "dnsmasq:\n  segments: 0\n").unwrap();

        let err = ClusterConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, LocalnetError::Config(_)));
    }

    #[test]
    fn test_validate_bridge_name() {
        let mut config = ClusterConfig::default();
        config.guest_bridge = String::new();
        assert!(config.validate().is_err());

        config.guest_bridge = "a-very-long-bridge-name".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_pool_size() {
        let mut config = ClusterConfig::default();
        config.dnsmasq.interfaces_per_segment = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ports() {
        let mut config = ClusterConfig::default();
        config.etcd.peer_port = config.etcd.client_port;
        assert!(config.validate().is_err());

        config.etcd.peer_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip_preserves_config() {
        let mut config = ClusterConfig::default();
        config.state_dir = Some(PathBuf::from("/var/tmp/localnet"));
        let yaml = config.to_yaml().unwrap();
        let parsed: ClusterConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
