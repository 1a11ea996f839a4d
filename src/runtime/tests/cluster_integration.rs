//! Integration test: full local cluster lifecycle.
//!
//! These tests build real clusters: a network namespace, bridges, TAP
//! devices, and `ssh-agent`, `dnsmasq` and `etcd` subprocesses.
//!
//! ## Prerequisites
//!
//! - Linux, running as root (namespaces and bridges need CAP_SYS_ADMIN and
//!   CAP_NET_ADMIN)
//! - `/dev/net/tun`
//! - `ssh-agent`, `ssh-add`, `dnsmasq` and `etcd` on `PATH`
//!
//! ## Running
//!
//! ```bash
//! # Run all integration tests
//! sudo -E cargo test -p localnet-runtime --test cluster_integration -- --ignored --nocapture
//!
//! # Run a single test
//! sudo -E cargo test -p localnet-runtime --test cluster_integration -- --ignored --nocapture test_cluster_scenario
//! ```
//!
//! Tests are `#[ignore]` by default because they need root and the
//! service binaries.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use localnet_core::{ClusterConfig, LocalnetError};
use localnet_runtime::{ClusterState, LocalCluster, NsId, TapConfig, VirtualInterface};
use serial_test::serial;

/// Small pools keep dnsmasq startup fast.
fn test_config(state_dir: &Path) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.state_dir = Some(state_dir.to_path_buf());
    config.dnsmasq.segments = 2;
    config.dnsmasq.interfaces_per_segment = 8;
    config
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[test]
#[ignore]
#[serial]
fn test_cluster_scenario() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();
    assert_eq!(cluster.state(), ClusterState::Ready);

    let endpoint = cluster.coordination_endpoint().unwrap();
    assert_eq!(endpoint, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 2379));
    assert_eq!(cluster.coordination_url().unwrap(), "http://10.0.0.1:2379");
    assert_eq!(cluster.bridges().unwrap(), vec!["br0", "br1"]);

    let tap = cluster.new_virtual_interface("br0").unwrap();
    assert!(tap.is_up().unwrap());
    assert_eq!(tap.bridge(), Some("br0"));
    assert!(tap.index() > 0);

    cluster
        .wait_for_coordination_store(100, Duration::from_millis(100))
        .unwrap();

    drop(tap);
    cluster.destroy().unwrap();
    assert_eq!(cluster.state(), ClusterState::Destroyed);
    assert!(matches!(
        cluster.coordination_endpoint(),
        Err(LocalnetError::InvalidState { .. })
    ));

    // Destroying again is a no-op
    cluster.destroy().unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_destroy_releases_everything() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();

    let socket = cluster.ssh_auth_sock().unwrap().to_path_buf();
    assert!(socket.exists());
    // One scratch directory each for the agent and etcd
    assert_eq!(dir_entries(state.path()).len(), 2);

    cluster.destroy().unwrap();

    assert!(!socket.exists());
    assert!(dir_entries(state.path()).is_empty());
    assert!(cluster.netns().is_err());
}

#[test]
#[ignore]
#[serial]
fn test_failed_coordination_store_unwinds() {
    let state = tempfile::tempdir().unwrap();
    let mut config = test_config(state.path());
    config.etcd.binary = PathBuf::from("/nonexistent/etcd");

    let before = NsId::current().unwrap();
    let mut cluster = LocalCluster::new(config);
    let err = cluster.initialize().unwrap_err();

    assert!(matches!(err, LocalnetError::Resource(_)));
    assert_eq!(cluster.state(), ClusterState::Destroyed);
    assert!(dir_entries(state.path()).is_empty());
    assert_eq!(NsId::current().unwrap(), before);
}

#[test]
#[ignore]
#[serial]
fn test_coordination_store_dying_after_start_unwinds() {
    let state = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let etcd = bin.path().join("etcd");
    std::fs::write(&etcd, "#!/bin/sh\nsleep 0.3\nexit 1\n").unwrap();
    std::fs::set_permissions(&etcd, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = test_config(state.path());
    config.etcd.binary = etcd;

    let before = NsId::current().unwrap();
    let mut cluster = LocalCluster::new(config);
    let err = cluster.initialize().unwrap_err();

    assert!(matches!(err, LocalnetError::Resource(_)));
    assert_eq!(cluster.state(), ClusterState::Destroyed);
    assert!(cluster.coordination_endpoint().is_err());
    assert!(dir_entries(state.path()).is_empty());
    assert_eq!(NsId::current().unwrap(), before);
}

#[test]
#[ignore]
#[serial]
fn test_unserved_guest_bridge_unwinds() {
    let state = tempfile::tempdir().unwrap();
    let mut config = test_config(state.path());
    config.guest_bridge = "br9".to_string();

    let mut cluster = LocalCluster::new(config);
    let err = cluster.initialize().unwrap_err();

    assert!(matches!(err, LocalnetError::NotFound(_)));
    assert_eq!(cluster.state(), ClusterState::Destroyed);
    assert!(dir_entries(state.path()).is_empty());
}

#[test]
#[ignore]
#[serial]
fn test_scoped_regions_restore_namespace() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();
    let before = NsId::current().unwrap();

    let _tap = cluster.new_virtual_interface("br1").unwrap();
    assert_eq!(NsId::current().unwrap(), before);

    let err = cluster.new_virtual_interface("br7").unwrap_err();
    assert!(matches!(err, LocalnetError::NotFound(_)));
    assert_eq!(NsId::current().unwrap(), before);

    let inside = cluster
        .netns()
        .unwrap()
        .run(NsId::current)
        .unwrap();
    assert_ne!(inside, before);
    assert_eq!(inside, cluster.netns().unwrap().id());
    assert_eq!(NsId::current().unwrap(), before);

    cluster.destroy().unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_attach_to_non_bridge_fails() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();

    let err = cluster
        .netns()
        .unwrap()
        .run(|| {
            let mut tap = VirtualInterface::create(&TapConfig::new().with_name("tap-lo"))?;
            tap.attach_to_bridge("lo")
        })
        .unwrap_err();
    assert!(matches!(err, LocalnetError::NotABridge(_)));

    cluster.destroy().unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_command_runs_in_namespace_with_agent() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();
    let socket = cluster.ssh_auth_sock().unwrap().to_path_buf();

    let output = cluster
        .new_command("sh")
        .unwrap()
        .args(["-c", "echo $FOO; echo $SSH_AUTH_SOCK; readlink /proc/self/ns/net"])
        .env("FOO", "bar")
        .output()
        .unwrap();
    assert!(output.success(), "stderr: {}", output.stderr_lossy());

    let stdout = output.stdout_lossy();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "bar");
    assert_eq!(lines[1], socket.display().to_string());
    assert_eq!(lines[2], cluster.netns().unwrap().id().to_string());

    cluster.destroy().unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_next_interface_hands_out_in_order() {
    let state = tempfile::tempdir().unwrap();
    let mut cluster = LocalCluster::start(test_config(state.path())).unwrap();

    let first = cluster.next_interface("br0").unwrap();
    let second = cluster.next_interface("br0").unwrap();
    assert_eq!(first.hostname, "br0-2");
    assert_eq!(second.hostname, "br0-3");
    assert_eq!(first.first_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 2)));

    for _ in 4..8 {
        cluster.next_interface("br0").unwrap();
    }
    assert!(matches!(
        cluster.next_interface("br0"),
        Err(LocalnetError::LeasesExhausted(_))
    ));
    assert!(matches!(
        cluster.next_interface("br5"),
        Err(LocalnetError::NotFound(_))
    ));

    cluster.destroy().unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_drop_destroys_ready_cluster() {
    let state = tempfile::tempdir().unwrap();
    let socket = {
        let cluster = LocalCluster::start(test_config(state.path())).unwrap();
        cluster.ssh_auth_sock().unwrap().to_path_buf()
    };
    assert!(!socket.exists());
    assert!(dir_entries(state.path()).is_empty());
}
