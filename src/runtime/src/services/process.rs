//! Supervised daemon processes.
//!
//! Each ephemeral service owns one long-running child. The child is spawned
//! from whatever namespace the calling thread is in, so services that must
//! see the cluster network are started inside a `NetNs` region.

use std::process::{Child, ChildStdin, Command};
use std::time::{Duration, Instant};

use localnet_core::error::{LocalnetError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// How long a daemon gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(50);

/// A daemon child owned by one service.
#[derive(Debug)]
pub(crate) struct DaemonProcess {
    name: &'static str,
    child: Option<Child>,
}

impl DaemonProcess {
    /// Spawn `cmd`. `name` is used in logs and errors.
    pub fn spawn(name: &'static str, cmd: &mut Command) -> Result<Self> {
        let child = cmd.spawn().map_err(|e| {
            LocalnetError::Resource(format!("failed to spawn {}: {} (is it installed?)", name, e))
        })?;

        tracing::info!(service = name, pid = child.id(), "Daemon started");
        Ok(Self {
            name,
            child: Some(child),
        })
    }

    /// Take the child's stdin, if it was spawned with a pipe.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.as_mut().and_then(|child| child.stdin.take())
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Fail with `Resource` if the child has already exited.
    pub fn ensure_running(&mut self) -> Result<()> {
        let Some(ref mut child) = self.child else {
            return Err(LocalnetError::Resource(format!("{} is not running", self.name)));
        };
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(LocalnetError::Resource(format!(
                "{} exited during startup ({})",
                self.name, status
            ))),
        }
    }

    /// Watch the child for `window`, failing if it exits before then.
    pub fn settle(&mut self, window: Duration) -> Result<()> {
        let deadline = Instant::now() + window;
        loop {
            self.ensure_running()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    /// Terminate and reap the child. A no-op once stopped.
    ///
    /// Sends SIGTERM and waits up to a grace period, then SIGKILL.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();

        if self.has_exited(&mut child)? {
            tracing::debug!(service = self.name, pid, "Daemon already exited");
            return Ok(());
        }

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                // Still try to reap it below.
                tracing::warn!(service = self.name, pid, error = %e, "Failed to signal daemon");
            }
        }

        let mut waited = Duration::ZERO;
        while waited < STOP_GRACE {
            if self.has_exited(&mut child)? {
                tracing::info!(service = self.name, pid, "Daemon stopped");
                return Ok(());
            }
            std::thread::sleep(STOP_POLL);
            waited += STOP_POLL;
        }

        tracing::warn!(service = self.name, pid, "Daemon ignored SIGTERM, killing");
        child.kill().map_err(|e| {
            LocalnetError::Resource(format!("failed to kill {} (pid {}): {}", self.name, pid, e))
        })?;
        child.wait()?;
        tracing::info!(service = self.name, pid, "Daemon killed");
        Ok(())
    }

    /// Poll `child`; if polling itself fails, kill it so it is not leaked.
    fn has_exited(&self, child: &mut Child) -> Result<bool> {
        match child.try_wait() {
            Ok(status) => Ok(status.is_some()),
            Err(e) => {
                tracing::warn!(
                    service = self.name,
                    pid = child.id(),
                    error = %e,
                    "Failed to poll daemon, killing"
                );
                let _ = child.kill();
                let _ = child.wait();
                Err(e.into())
            }
        }
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(service = self.name, error = %e, "Failed to stop daemon on drop");
        }
    }
}
