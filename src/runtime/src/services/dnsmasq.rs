//! DHCP/DNS for guests on the cluster bridges.
//!
//! At start the service builds one bridge per segment inside the calling
//! thread's namespace, gives each bridge its segment's server addresses, and
//! launches `dnsmasq` with a configuration that pins every pool interface to
//! a static lease. The segment set is fixed from then on.

use std::fmt::Write as _;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::time::Duration;

use localnet_core::config::DnsmasqConfig;
use localnet_core::error::{LocalnetError, Result};
use localnet_core::segment::{Interface, Segment, Segments};
use parking_lot::Mutex;

use super::process::DaemonProcess;
use super::Service;
use crate::network::LinkSocket;

/// dnsmasq binds and parses its configuration right away; one that survives
/// this long is serving.
const STARTUP_WINDOW: Duration = Duration::from_millis(500);

/// A running DHCP/DNS daemon and the segments it serves.
#[derive(Debug)]
pub struct Dnsmasq {
    segments: Mutex<Segments>,
    process: DaemonProcess,
}

impl Dnsmasq {
    /// Create the bridges and start the daemon.
    ///
    /// Must run inside the cluster namespace scope: the bridges and the
    /// daemon both land in the calling thread's namespace.
    pub fn start(config: &DnsmasqConfig) -> Result<Self> {
        let segments = Segments::derive(config.segments, config.interfaces_per_segment);

        let link = LinkSocket::open()?;
        for segment in segments.iter() {
            setup_bridge(&link, segment, config.mtu)?;
        }

        let rendered = render_config(&segments);

        let mut cmd = Command::new(&config.binary);
        cmd.arg("--conf-file=-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut process = DaemonProcess::spawn("dnsmasq", &mut cmd)?;
        if let Err(e) = feed_config(&mut process, &rendered) {
            if let Err(cleanup) = process.stop() {
                tracing::warn!(error = %cleanup, "Failed to stop dnsmasq after failed start");
            }
            return Err(e);
        }

        tracing::info!(
            pid = process.pid(),
            segments = segments.len(),
            "DHCP/DNS service started"
        );

        Ok(Self {
            segments: Mutex::new(segments),
            process,
        })
    }

    /// Bridge names served, in segment order.
    pub fn bridges(&self) -> Vec<String> {
        self.segments
            .lock()
            .iter()
            .map(|s| s.bridge_name().to_string())
            .collect()
    }

    /// Run `f` against the segment list.
    pub fn with_segments<T>(&self, f: impl FnOnce(&Segments) -> T) -> T {
        f(&self.segments.lock())
    }

    /// Hand out the next unused guest interface on `bridge`.
    pub fn next_interface(&self, bridge: &str) -> Result<Interface> {
        let iface = self.segments.lock().next_interface(bridge)?;
        tracing::debug!(
            bridge,
            hostname = %iface.hostname,
            mac = %iface.hardware_addr,
            "Handed out guest interface"
        );
        Ok(iface)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

impl Service for Dnsmasq {
    fn name(&self) -> &'static str {
        "dnsmasq"
    }

    fn destroy(&mut self) -> Result<()> {
        self.process.stop()
    }
}

fn setup_bridge(link: &LinkSocket, segment: &Segment, mtu: u32) -> Result<()> {
    let name = segment.bridge_name();
    let iface = segment.bridge_interface();

    link.add_bridge(name)?;
    link.set_hwaddr(name, iface.hardware_addr)?;
    link.set_mtu(name, mtu)?;
    if let Some(&v4) = iface.ipv4.first() {
        link.set_ipv4(name, v4)?;
    }
    link.set_up(name, true)?;
    // IPv6 addresses need the link up, or DAD leaves them tentative.
    for &v6 in &iface.ipv6 {
        link.add_ipv6(name, v6)?;
    }

    tracing::debug!(bridge = name, mtu, "Configured segment bridge");
    Ok(())
}

fn feed_config(process: &mut DaemonProcess, rendered: &str) -> Result<()> {
    let mut stdin = process
        .take_stdin()
        .ok_or_else(|| LocalnetError::Resource("dnsmasq stdin is not piped".to_string()))?;
    stdin.write_all(rendered.as_bytes()).map_err(|e| {
        LocalnetError::Resource(format!("failed to write dnsmasq configuration: {}", e))
    })?;
    drop(stdin);
    process.settle(STARTUP_WINDOW)
}

/// Render the daemon configuration for `segments`.
///
/// Every pool interface gets a `dhcp-host` line binding its MAC to its
/// hostname and addresses, so leases are deterministic.
pub fn render_config(segments: &Segments) -> String {
    let mut out = String::new();
    out.push_str(
        "keep-in-foreground\n\
         leasefile-ro\n\
         log-facility=-\n\
         pid-file=\n\
         \n\
         no-resolv\n\
         no-hosts\n\
         enable-ra\n\
         \n\
         # point NTP at this host (0.0.0.0 and :: are special)\n\
         dhcp-option=option:ntp-server,0.0.0.0\n\
         dhcp-option=option6:ntp-server,[::]\n",
    );

    for segment in segments.iter() {
        let bridge_if = segment.bridge_interface();
        let _ = writeln!(out);
        let _ = writeln!(out, "domain={}.local", segment.bridge_name());
        for v4 in &bridge_if.ipv4 {
            let _ = writeln!(out, "dhcp-range={},static,{}", v4.addr, v4.netmask());
        }
        for v6 in &bridge_if.ipv6 {
            let _ = writeln!(out, "dhcp-range={},static,{}", v6.addr, v6.prefix_len);
        }
        for iface in segment.available() {
            let _ = write!(out, "dhcp-host={},{}", iface.hardware_addr, iface.hostname);
            for v4 in &iface.ipv4 {
                let _ = write!(out, ",{}", v4.addr);
            }
            for v6 in &iface.ipv6 {
                let _ = write!(out, ",[{}]", v6.addr);
            }
            out.push('\n');
        }
    }
    out
}
