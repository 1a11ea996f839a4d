//! Host prerequisite detection.
//!
//! A local cluster needs:
//! - privileges to create namespaces and links (effective root)
//! - `/dev/net/tun` for TAP devices
//! - the ssh-agent, ssh-add, dnsmasq and etcd executables

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use localnet_core::config::ClusterConfig;

const TUN_DEVICE: &str = "/dev/net/tun";

/// Outcome of one prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    /// What was checked.
    pub name: String,
    pub satisfied: bool,
    /// Where it was found, or why it is missing.
    pub details: String,
}

impl Prerequisite {
    fn ok(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            satisfied: true,
            details: details.into(),
        }
    }

    fn missing(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            satisfied: false,
            details: details.into(),
        }
    }
}

/// Check every prerequisite for running clusters with `config`.
pub fn check_host(config: &ClusterConfig) -> Vec<Prerequisite> {
    let mut checks = vec![check_privileges(), check_tun_device()];
    for binary in [
        &config.ssh_agent.binary,
        &config.ssh_agent.add_binary,
        &config.dnsmasq.binary,
        &config.etcd.binary,
    ] {
        checks.push(check_binary(binary));
    }
    checks
}

fn check_privileges() -> Prerequisite {
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        Prerequisite::ok("privileges", "running as root")
    } else {
        Prerequisite::missing(
            "privileges",
            format!(
                "effective uid is {}; creating namespaces and bridges needs root (CAP_SYS_ADMIN, CAP_NET_ADMIN)",
                euid
            ),
        )
    }
}

fn check_tun_device() -> Prerequisite {
    let path = Path::new(TUN_DEVICE);
    if !path.exists() {
        return Prerequisite::missing(
            TUN_DEVICE,
            "not found. Load the tun kernel module (modprobe tun).",
        );
    }

    match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => Prerequisite::ok(TUN_DEVICE, "available"),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Prerequisite::missing(TUN_DEVICE, format!("access denied: {}", e))
        }
        Err(e) => Prerequisite::missing(TUN_DEVICE, format!("failed to open: {}", e)),
    }
}

fn check_binary(binary: &Path) -> Prerequisite {
    let name = binary.display().to_string();
    match find_executable(binary) {
        Some(path) => Prerequisite::ok(name, path.display().to_string()),
        None => Prerequisite::missing(name, "not found on PATH"),
    }
}

/// Resolve `binary` the way `Command` would: paths with a separator are
/// taken as-is, bare names are searched on `PATH`.
pub fn find_executable(binary: &Path) -> Option<PathBuf> {
    find_executable_in(binary, std::env::var_os("PATH").as_deref())
}

fn find_executable_in(binary: &Path, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return is_executable(binary).then(|| binary.to_path_buf());
    }

    std::env::split_paths(search_path?)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
