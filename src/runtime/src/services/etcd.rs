//! Single-node coordination store.
//!
//! A throwaway `etcd` member with its data in a scratch directory. Clients
//! reach it on every address of the cluster namespace; the peer listener
//! stays on loopback since there are no peers.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use localnet_core::config::EtcdConfig;
use localnet_core::error::{LocalnetError, Result};
use tempfile::TempDir;

use super::process::DaemonProcess;
use super::{remove_scratch_dir, scratch_dir, Service};
use crate::retry::retry;

const READY_ATTEMPTS: u32 = 100;
const READY_DELAY: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// A running single-node etcd.
#[derive(Debug)]
pub struct SimpleEtcd {
    port: u16,
    advertise: SocketAddrV4,
    process: DaemonProcess,
    dir: Option<TempDir>,
}

impl SimpleEtcd {
    /// Start the store, advertising `advertise_addr` to clients.
    ///
    /// Returns once the client port accepts connections. Must run inside the
    /// cluster namespace scope.
    pub fn start(
        config: &EtcdConfig,
        advertise_addr: Ipv4Addr,
        state_dir: Option<&Path>,
    ) -> Result<Self> {
        let dir = scratch_dir(state_dir, "localnet-etcd-")?;
        let data_dir = dir.path().join("data");
        let advertise = SocketAddrV4::new(advertise_addr, config.client_port);

        let mut cmd = Command::new(&config.binary);
        cmd.args(etcd_args(config, advertise, &data_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let process = match DaemonProcess::spawn("etcd", &mut cmd) {
            Ok(process) => process,
            Err(e) => {
                if let Err(cleanup) = remove_scratch_dir(Some(dir)) {
                    tracing::warn!(error = %cleanup, "Failed to remove etcd scratch directory");
                }
                return Err(e);
            }
        };

        let mut etcd = Self {
            port: config.client_port,
            advertise,
            process,
            dir: Some(dir),
        };

        if let Err(e) = etcd.wait_until_serving() {
            if let Err(cleanup) = etcd.destroy() {
                tracing::warn!(error = %cleanup, "Failed to clean up etcd after failed start");
            }
            return Err(e);
        }

        tracing::info!(
            pid = etcd.pid(),
            port = etcd.port,
            advertise = %advertise,
            "Coordination store started"
        );
        Ok(etcd)
    }

    fn wait_until_serving(&mut self) -> Result<()> {
        let local = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.port));
        // A dead daemon ends the wait at once (inner error); a refused
        // connect is retried.
        retry(READY_ATTEMPTS, READY_DELAY, || {
            if let Err(e) = self.process.ensure_running() {
                return Ok(Err(e));
            }
            TcpStream::connect_timeout(&local, CONNECT_TIMEOUT)
                .map(|_| Ok(()))
                .map_err(|e| {
                    LocalnetError::Resource(format!("etcd not serving on {}: {}", local, e))
                })
        })?
    }

    /// Client port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client URL the store advertises.
    pub fn client_url(&self) -> String {
        format!("http://{}", self.advertise)
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join("data"))
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

impl Service for SimpleEtcd {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn destroy(&mut self) -> Result<()> {
        let stopped = self.process.stop();
        let removed = remove_scratch_dir(self.dir.take());
        stopped.and(removed)
    }
}

fn etcd_args(config: &EtcdConfig, advertise: SocketAddrV4, data_dir: &Path) -> Vec<String> {
    let peer_url = format!("http://127.0.0.1:{}", config.peer_port);
    vec![
        "--name".to_string(),
        config.name.clone(),
        "--data-dir".to_string(),
        data_dir.display().to_string(),
        "--listen-client-urls".to_string(),
        format!("http://0.0.0.0:{}", config.client_port),
        "--advertise-client-urls".to_string(),
        format!("http://{}", advertise),
        "--listen-peer-urls".to_string(),
        peer_url.clone(),
        "--initial-advertise-peer-urls".to_string(),
        peer_url.clone(),
        "--initial-cluster".to_string(),
        format!("{}={}", config.name, peer_url),
        "--initial-cluster-state".to_string(),
        "new".to_string(),
    ]
}
