//! Ephemeral services that back a local cluster.
//!
//! Each service wraps one daemon subprocess plus whatever scratch state it
//! needs, and shares the same shape: a `start` constructor that fails with
//! `Resource` if the daemon cannot be brought up, and [`Service::destroy`]
//! which always attempts full cleanup and reports the first failure.

mod dnsmasq;
mod etcd;
mod process;
mod ssh_agent;

pub use dnsmasq::{render_config, Dnsmasq};
pub use etcd::SimpleEtcd;
pub use ssh_agent::SshAgent;

use std::path::Path;

use localnet_core::error::{LocalnetError, Result};
use tempfile::TempDir;

/// A resource that can be torn down exactly once.
pub trait Service {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Release the service.
    fn destroy(&mut self) -> Result<()>;
}

/// Start `first`, then `second`. If `second` fails, `first` is destroyed
/// before the error is returned.
pub(crate) fn start_pair<A, B>(
    first: impl FnOnce() -> Result<A>,
    second: impl FnOnce(&A) -> Result<B>,
) -> Result<(A, B)>
where
    A: Service,
    B: Service,
{
    let mut a = first()?;
    match second(&a) {
        Ok(b) => Ok((a, b)),
        Err(e) => {
            if let Err(cleanup) = a.destroy() {
                tracing::warn!(
                    service = a.name(),
                    error = %cleanup,
                    "Failed to destroy service while unwinding"
                );
            }
            Err(e)
        }
    }
}

/// Create a private scratch directory under `parent` (or the system temp
/// dir). It is removed when the returned handle is closed or dropped.
pub(crate) fn scratch_dir(parent: Option<&Path>, prefix: &str) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(|e| {
                LocalnetError::Resource(format!(
                    "failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    };
    dir.map_err(|e| LocalnetError::Resource(format!("failed to create scratch directory: {}", e)))
}

/// Remove a scratch directory, reporting failure.
pub(crate) fn remove_scratch_dir(dir: Option<TempDir>) -> Result<()> {
    let Some(dir) = dir else {
        return Ok(());
    };
    let path = dir.path().to_path_buf();
    dir.close().map_err(|e| {
        LocalnetError::Resource(format!("failed to remove {}: {}", path.display(), e))
    })
}
