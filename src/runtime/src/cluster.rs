//! Local cluster orchestration.
//!
//! A [`LocalCluster`] owns one private network namespace and the three
//! ephemeral services that run alongside it:
//!
//! 1. the namespace itself,
//! 2. an SSH agent (host side; its socket is exported to commands),
//! 3. dnsmasq, serving the segment bridges (inside the namespace),
//! 4. a single-node etcd (inside the namespace).
//!
//! Initialization builds them in that order and unwinds whatever already
//! exists if a later step fails. Destruction runs in reverse service order
//! (etcd, dnsmasq, agent, namespace); every step is attempted and the first
//! error is returned.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::path::Path;
use std::time::Duration;

use localnet_core::config::ClusterConfig;
use localnet_core::error::{LocalnetError, Result};
use localnet_core::segment::Interface;

use crate::command::ClusterCommand;
use crate::netns::NetNs;
use crate::network::{TapConfig, VirtualInterface};
use crate::retry::retry;
use crate::services::{start_pair, Dnsmasq, Service, SimpleEtcd, SshAgent};
use crate::teardown::destroy_all;

/// Connect timeout for a single coordination store probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`LocalCluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    Initializing,
    Ready,
    Destroying,
    Destroyed,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Uninitialized => "uninitialized",
            ClusterState::Initializing => "initializing",
            ClusterState::Ready => "ready",
            ClusterState::Destroying => "destroying",
            ClusterState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a ready cluster owns. Exists as a whole or not at all.
#[derive(Debug)]
struct ClusterResources {
    netns: NetNs,
    ssh_agent: SshAgent,
    dnsmasq: Dnsmasq,
    etcd: SimpleEtcd,
}

impl ClusterResources {
    fn destroy(&mut self) -> Result<()> {
        destroy_in_order(
            &mut self.etcd,
            &mut self.dnsmasq,
            &mut self.ssh_agent,
            &mut self.netns,
        )
    }
}

/// Cluster teardown order: etcd, dnsmasq, the SSH agent, then the
/// namespace. Every step runs; the first error wins.
fn destroy_in_order<'a>(
    etcd: &'a mut dyn Service,
    dnsmasq: &'a mut dyn Service,
    ssh_agent: &'a mut dyn Service,
    netns: &'a mut dyn Service,
) -> Result<()> {
    destroy_all(&mut [etcd, dnsmasq, ssh_agent, netns])
}

/// An isolated network namespace with DHCP/DNS, etcd and an SSH agent.
#[derive(Debug)]
pub struct LocalCluster {
    id: String,
    config: ClusterConfig,
    state: ClusterState,
    resources: Option<ClusterResources>,
}

impl LocalCluster {
    /// Create an uninitialized cluster.
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            state: ClusterState::Uninitialized,
            resources: None,
        }
    }

    /// Create and initialize a cluster in one step.
    pub fn start(config: ClusterConfig) -> Result<Self> {
        let mut cluster = Self::new(config);
        cluster.initialize()?;
        Ok(cluster)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Build the namespace and start every service.
    ///
    /// On failure nothing created by this call survives, the original
    /// error is returned and the cluster ends up `Destroyed`.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != ClusterState::Uninitialized {
            return Err(LocalnetError::InvalidState {
                expected: ClusterState::Uninitialized.as_str(),
                actual: self.state.as_str(),
            });
        }

        self.state = ClusterState::Initializing;
        tracing::info!(cluster = %self.id, "Initializing local cluster");

        let built = self
            .config
            .validate()
            .and_then(|()| build_resources(&self.config));
        match built {
            Ok(resources) => {
                tracing::info!(
                    cluster = %self.id,
                    netns = %resources.netns.id(),
                    socket = %resources.ssh_agent.socket().display(),
                    port = resources.etcd.port(),
                    "Local cluster ready"
                );
                self.resources = Some(resources);
                self.state = ClusterState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!(cluster = %self.id, error = %e, "Local cluster initialization failed");
                self.state = ClusterState::Destroyed;
                Err(e)
            }
        }
    }

    /// Tear everything down: etcd, dnsmasq, the SSH agent, then the
    /// namespace. Every step runs; the first error is returned.
    ///
    /// A no-op on a destroyed cluster.
    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            ClusterState::Ready => {}
            ClusterState::Destroyed => return Ok(()),
            other => {
                return Err(LocalnetError::InvalidState {
                    expected: ClusterState::Ready.as_str(),
                    actual: other.as_str(),
                })
            }
        }

        self.state = ClusterState::Destroying;
        tracing::info!(cluster = %self.id, "Destroying local cluster");

        let result = match self.resources.take() {
            Some(mut r) => r.destroy(),
            None => Ok(()),
        };

        self.state = ClusterState::Destroyed;
        match result {
            Ok(()) => tracing::info!(cluster = %self.id, "Local cluster destroyed"),
            Err(ref e) => {
                tracing::warn!(cluster = %self.id, error = %e, "Local cluster destroyed with errors")
            }
        }
        result
    }

    fn resources(&self) -> Result<&ClusterResources> {
        match (self.state, self.resources.as_ref()) {
            (ClusterState::Ready, Some(resources)) => Ok(resources),
            _ => Err(LocalnetError::InvalidState {
                expected: ClusterState::Ready.as_str(),
                actual: self.state.as_str(),
            }),
        }
    }

    /// The cluster's namespace handle.
    pub fn netns(&self) -> Result<&NetNs> {
        Ok(&self.resources()?.netns)
    }

    /// Build a command that runs inside the namespace with `SSH_AUTH_SOCK`
    /// added to its environment. Further entries the caller adds are kept
    /// alongside it.
    pub fn new_command(&self, program: impl AsRef<std::ffi::OsStr>) -> Result<ClusterCommand<'_>> {
        let resources = self.resources()?;
        let mut cmd = ClusterCommand::new(&resources.netns, program)?;
        let (key, socket) = resources.ssh_agent.auth_sock_env();
        cmd.env(key, socket);
        Ok(cmd)
    }

    /// SSH agent socket path.
    pub fn ssh_auth_sock(&self) -> Result<&Path> {
        Ok(self.resources()?.ssh_agent.socket())
    }

    /// `address:port` of the coordination store, on the guest bridge.
    pub fn coordination_endpoint(&self) -> Result<SocketAddrV4> {
        let resources = self.resources()?;
        let port = resources.etcd.port();
        resources
            .dnsmasq
            .with_segments(|segments| segments.endpoint(&self.config.guest_bridge, port))
    }

    /// Client URL of the coordination store.
    pub fn coordination_url(&self) -> Result<String> {
        Ok(format!("http://{}", self.coordination_endpoint()?))
    }

    /// Open a TCP connection to the coordination store from inside the
    /// namespace.
    pub fn probe_coordination_store(&self, timeout: Duration) -> Result<()> {
        let resources = self.resources()?;
        let endpoint = SocketAddr::V4(self.coordination_endpoint()?);
        resources.netns.run(|| {
            TcpStream::connect_timeout(&endpoint, timeout).map_err(|e| {
                LocalnetError::Resource(format!(
                    "coordination store at {} unreachable: {}",
                    endpoint, e
                ))
            })?;
            Ok(())
        })
    }

    /// Probe the coordination store until it accepts connections.
    pub fn wait_for_coordination_store(&self, attempts: u32, delay: Duration) -> Result<()> {
        retry(attempts, delay, || self.probe_coordination_store(PROBE_TIMEOUT))?;
        tracing::debug!(cluster = %self.id, "Coordination store is reachable");
        Ok(())
    }

    /// Bridges served by the DHCP/DNS service.
    pub fn bridges(&self) -> Result<Vec<String>> {
        Ok(self.resources()?.dnsmasq.bridges())
    }

    /// Reserve the next guest interface (MAC, addresses, hostname) on
    /// `bridge`.
    pub fn next_interface(&self, bridge: &str) -> Result<Interface> {
        self.resources()?.dnsmasq.next_interface(bridge)
    }

    /// Create a TAP device on `bridge` and bring it up.
    ///
    /// The caller owns the device from here on; the cluster does not track
    /// it, and it disappears with the namespace at the latest.
    pub fn new_virtual_interface(&self, bridge: &str) -> Result<VirtualInterface> {
        self.new_virtual_interface_with(bridge, &TapConfig::default())
    }

    /// Like [`new_virtual_interface`](Self::new_virtual_interface) with an
    /// explicit TAP configuration.
    pub fn new_virtual_interface_with(
        &self,
        bridge: &str,
        config: &TapConfig,
    ) -> Result<VirtualInterface> {
        let resources = self.resources()?;
        resources.netns.run(|| {
            let mut tap = VirtualInterface::create(config)?;
            tap.attach_to_bridge(bridge)?;
            tap.activate()?;
            Ok(tap)
        })
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        if self.state == ClusterState::Ready {
            if let Err(e) = self.destroy() {
                tracing::error!(cluster = %self.id, error = %e, "Failed to destroy local cluster on drop");
            }
        }
    }
}

fn build_resources(config: &ClusterConfig) -> Result<ClusterResources> {
    let state_dir = config.state_dir.as_deref();

    let mut netns = NetNs::create()?;

    let mut ssh_agent = match SshAgent::start(&config.ssh_agent, state_dir) {
        Ok(agent) => agent,
        Err(e) => {
            unwind(&mut [&mut netns]);
            return Err(e);
        }
    };

    // dnsmasq and etcd must see the private network, so both start inside
    // the namespace.
    let started = netns.run(|| {
        start_pair(
            || Dnsmasq::start(&config.dnsmasq),
            |dnsmasq| {
                let advertise = dnsmasq.with_segments(|segments| {
                    segments.endpoint(&config.guest_bridge, config.etcd.client_port)
                })?;
                SimpleEtcd::start(&config.etcd, *advertise.ip(), state_dir)
            },
        )
    });

    match started {
        Ok((dnsmasq, etcd)) => Ok(ClusterResources {
            netns,
            ssh_agent,
            dnsmasq,
            etcd,
        }),
        Err(e) => {
            unwind(&mut [&mut ssh_agent, &mut netns]);
            Err(e)
        }
    }
}

/// Release what a failed initialization already built. Cleanup failures
/// are logged; the caller returns the original error.
fn unwind(services: &mut [&mut dyn Service]) {
    if let Err(e) = destroy_all(services) {
        tracing::warn!(error = %e, "Cleanup after failed initialization was incomplete");
    }
}
