//! Commands that run inside a cluster namespace.
//!
//! The child joins the namespace with `setns` between fork and exec, so
//! the spawning thread never leaves its own namespace and spawning needs no
//! scoped region.

use std::ffi::OsStr;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};

use localnet_core::error::{LocalnetError, Result};

use crate::netns::NetNs;

/// A command bound to a network namespace.
#[derive(Debug)]
pub struct ClusterCommand<'a> {
    netns: &'a NetNs,
    inner: Command,
}

impl<'a> ClusterCommand<'a> {
    /// Build a command that will run in `netns`.
    pub fn new(netns: &'a NetNs, program: impl AsRef<OsStr>) -> Result<Self> {
        let raw = netns.with_fd(|fd| Ok(fd.as_raw_fd()))?;

        let mut inner = Command::new(program);
        unsafe {
            inner.pre_exec(move || {
                if libc::setns(raw, libc::CLONE_NEWNET) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(Self { netns, inner })
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    /// Add an environment entry on top of the inherited environment.
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.inner.env(key, value);
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.inner.envs(vars);
        self
    }

    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.inner.current_dir(dir);
        self
    }

    pub fn stdin(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdin(cfg);
        self
    }

    pub fn stdout(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdout(cfg);
        self
    }

    pub fn stderr(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stderr(cfg);
        self
    }

    pub fn get_program(&self) -> &OsStr {
        self.inner.get_program()
    }

    pub fn get_args(&self) -> impl Iterator<Item = &OsStr> {
        self.inner.get_args()
    }

    /// Environment entries set on this command (not the inherited ones).
    pub fn get_envs(&self) -> impl Iterator<Item = (&OsStr, Option<&OsStr>)> {
        self.inner.get_envs()
    }

    /// Value explicitly set for `key`, if any.
    pub fn get_env(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        let key = key.as_ref();
        self.inner
            .get_envs()
            .filter(|(k, _)| *k == key)
            .last()
            .and_then(|(_, v)| v)
    }

    pub fn spawn(&mut self) -> Result<Child> {
        let program = self.program_name();
        let inner = &mut self.inner;
        let child = self.netns.with_fd(|_| {
            inner
                .spawn()
                .map_err(|e| LocalnetError::Resource(format!("failed to spawn {}: {}", program, e)))
        })?;
        tracing::debug!(program = %program, pid = child.id(), netns = %self.netns.id(), "Spawned namespaced command");
        Ok(child)
    }

    /// Run to completion, inheriting stdio unless configured otherwise.
    pub fn status(&mut self) -> Result<ExitStatus> {
        let program = self.program_name();
        let mut child = self.spawn()?;
        child
            .wait()
            .map_err(|e| LocalnetError::Resource(format!("failed to wait for {}: {}", program, e)))
    }

    /// Run to completion, capturing stdout and stderr.
    pub fn output(&mut self) -> Result<CommandOutput> {
        let program = self.program_name();
        let inner = &mut self.inner;
        let output = self.netns.with_fd(|_| {
            inner
                .output()
                .map_err(|e| LocalnetError::Resource(format!("failed to run {}: {}", program, e)))
        })?;
        Ok(output.into())
    }

    fn program_name(&self) -> String {
        self.inner.get_program().to_string_lossy().into_owned()
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or `None` if the process was killed by a signal.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}
