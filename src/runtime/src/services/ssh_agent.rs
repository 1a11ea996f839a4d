//! SSH agent for namespaced commands.
//!
//! Runs `ssh-agent` in the foreground on a socket in a private scratch
//! directory. Commands run through the cluster get `SSH_AUTH_SOCK` pointing
//! at it, so they can authenticate to guests without touching the caller's
//! own agent.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use localnet_core::config::SshAgentConfig;
use localnet_core::error::{LocalnetError, Result};
use tempfile::TempDir;

use super::process::DaemonProcess;
use super::{remove_scratch_dir, scratch_dir, Service};
use crate::retry::retry;

/// Environment variable the agent socket is exported under.
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

const SOCKET_NAME: &str = "agent.sock";
const SOCKET_WAIT_ATTEMPTS: u32 = 50;
const SOCKET_WAIT_DELAY: Duration = Duration::from_millis(100);

/// A running SSH agent.
#[derive(Debug)]
pub struct SshAgent {
    socket: PathBuf,
    process: DaemonProcess,
    dir: Option<TempDir>,
}

impl SshAgent {
    /// Start an agent and load the configured identities into it.
    pub fn start(config: &SshAgentConfig, state_dir: Option<&Path>) -> Result<Self> {
        let dir = scratch_dir(state_dir, "localnet-ssh-")?;
        let socket = dir.path().join(SOCKET_NAME);

        let mut cmd = Command::new(&config.binary);
        cmd.arg("-D")
            .arg("-a")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut agent = Self {
            process: DaemonProcess::spawn("ssh-agent", &mut cmd)?,
            socket,
            dir: Some(dir),
        };

        if let Err(e) = agent.wait_for_socket().and_then(|()| agent.add_identities(config)) {
            if let Err(cleanup) = agent.destroy() {
                tracing::warn!(error = %cleanup, "Failed to clean up ssh-agent after failed start");
            }
            return Err(e);
        }

        tracing::info!(socket = %agent.socket.display(), "SSH agent ready");
        Ok(agent)
    }

    fn wait_for_socket(&mut self) -> Result<()> {
        let socket = self.socket.clone();
        retry(SOCKET_WAIT_ATTEMPTS, SOCKET_WAIT_DELAY, || {
            self.process.ensure_running()?;
            if socket.exists() {
                Ok(())
            } else {
                Err(LocalnetError::Resource(format!(
                    "ssh-agent socket {} did not appear",
                    socket.display()
                )))
            }
        })
    }

    fn add_identities(&self, config: &SshAgentConfig) -> Result<()> {
        for identity in &config.identities {
            let output = Command::new(&config.add_binary)
                .arg(identity)
                .env(SSH_AUTH_SOCK, &self.socket)
                .stdin(Stdio::null())
                .output()
                .map_err(|e| {
                    LocalnetError::Resource(format!(
                        "failed to run {}: {}",
                        config.add_binary.display(),
                        e
                    ))
                })?;

            if !output.status.success() {
                return Err(LocalnetError::Resource(format!(
                    "failed to add identity {}: {}",
                    identity.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            tracing::debug!(identity = %identity.display(), "Added SSH identity");
        }
        Ok(())
    }

    /// Agent socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// The `SSH_AUTH_SOCK` entry for child environments.
    pub fn auth_sock_env(&self) -> (&'static str, &Path) {
        (SSH_AUTH_SOCK, &self.socket)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

impl Service for SshAgent {
    fn name(&self) -> &'static str {
        "ssh-agent"
    }

    fn destroy(&mut self) -> Result<()> {
        let stopped = self.process.stop();
        let removed = remove_scratch_dir(self.dir.take());
        if stopped.is_ok() && removed.is_ok() {
            tracing::debug!(socket = %self.socket.display(), "SSH agent destroyed");
        }
        stopped.and(removed)
    }
}
