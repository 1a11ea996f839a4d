//! Bridge segments served by the DHCP/DNS service.
//!
//! A segment is one bridge plus the addresses leased on it. Segment `s`
//! owns bridge `br{s}`; its bridge interface and every guest interface in
//! its pool get deterministic addresses derived from `(s, index)`:
//!
//! - MAC  `02:00:00:{s}:{hi}:{lo}`
//! - IPv4 `10.{s}.{hi}.{lo}/16`
//! - IPv6 `fd00:{s}::{hi}{lo}/64`
//!
//! where `hi`/`lo` are the high and low bytes of the interface index.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4};
use std::str::FromStr;

use crate::error::{LocalnetError, Result};

/// Index of a segment's own bridge interface.
pub const BRIDGE_INTERFACE_INDEX: u16 = 1;

/// Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = LocalnetError;

    fn from_str(s: &str) -> Result<Self> {
        let mut mac = [0u8; 6];
        let mut parts = s.split(':');
        for byte in mac.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| LocalnetError::Config(format!("invalid MAC address: {}", s)))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| LocalnetError::Config(format!("invalid MAC address: {}", s)))?;
        }
        if parts.next().is_some() {
            return Err(LocalnetError::Config(format!("invalid MAC address: {}", s)));
        }
        Ok(MacAddr(mac))
    }
}

/// An IPv4 address with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Dotted-decimal netmask for the prefix length.
    pub fn netmask(&self) -> Ipv4Addr {
        prefix_to_netmask(self.prefix_len)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// An IPv6 address with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Cidr {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
}

impl Ipv6Cidr {
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }
}

impl fmt::Display for Ipv6Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Convert a prefix length to a netmask.
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    if prefix == 0 {
        return Ipv4Addr::new(0, 0, 0, 0);
    }
    let mask = !((1u64 << (32 - u32::from(prefix.min(32)))) - 1) as u32;
    Ipv4Addr::from(mask)
}

/// One network interface the DHCP/DNS service knows about: either a
/// bridge's own address or a lease reserved for a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub hardware_addr: MacAddr,
    pub ipv4: Vec<Ipv4Cidr>,
    pub ipv6: Vec<Ipv6Cidr>,
    pub hostname: String,
}

impl Interface {
    /// Derive the interface at `index` of segment `segment`.
    pub fn derive(segment: u8, index: u16, bridge_name: &str) -> Self {
        let [hi, lo] = index.to_be_bytes();
        let mut v6 = [0u8; 16];
        v6[0] = 0xfd;
        v6[3] = segment;
        v6[14] = hi;
        v6[15] = lo;

        Self {
            hardware_addr: MacAddr([0x02, 0x00, 0x00, segment, hi, lo]),
            ipv4: vec![Ipv4Cidr::new(Ipv4Addr::new(10, segment, hi, lo), 16)],
            ipv6: vec![Ipv6Cidr::new(Ipv6Addr::from(v6), 64)],
            hostname: format!("{}-{}", bridge_name, index),
        }
    }

    /// An interface carrying only the given IPv4 addresses.
    pub fn with_ipv4(hostname: &str, addrs: &[Ipv4Cidr]) -> Self {
        Self {
            hardware_addr: MacAddr([0x02, 0, 0, 0, 0, 0]),
            ipv4: addrs.to_vec(),
            ipv6: Vec::new(),
            hostname: hostname.to_string(),
        }
    }

    /// First assigned IPv4 address, if any.
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.first().map(|c| c.addr)
    }
}

/// A bridge and the addresses served on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    bridge_name: String,
    bridge_if: Interface,
    pool: VecDeque<Interface>,
}

impl Segment {
    /// Build segment `index` with a pool of `interfaces - 2` guest leases
    /// (indices `2..interfaces`).
    pub fn derive(index: u8, interfaces: u16) -> Self {
        let bridge_name = format!("br{}", index);
        let bridge_if = Interface::derive(index, BRIDGE_INTERFACE_INDEX, &bridge_name);
        let pool = (BRIDGE_INTERFACE_INDEX + 1..interfaces)
            .map(|i| Interface::derive(index, i, &bridge_name))
            .collect();
        Self {
            bridge_name,
            bridge_if,
            pool,
        }
    }

    /// Build a segment from explicit parts.
    pub fn new(bridge_name: impl Into<String>, bridge_if: Interface, pool: Vec<Interface>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            bridge_if,
            pool: pool.into(),
        }
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    /// The bridge's own interface (its addresses are the gateway/server
    /// addresses for the segment).
    pub fn bridge_interface(&self) -> &Interface {
        &self.bridge_if
    }

    /// Leases not yet handed out, in hand-out order.
    pub fn available(&self) -> impl Iterator<Item = &Interface> {
        self.pool.iter()
    }

    pub fn remaining(&self) -> usize {
        self.pool.len()
    }

    /// Hand out the next guest interface.
    pub fn take_interface(&mut self) -> Option<Interface> {
        self.pool.pop_front()
    }
}

/// Ordered segment collection with lookup by bridge name.
#[derive(Debug, Clone, Default)]
pub struct Segments {
    list: Vec<Segment>,
    by_bridge: HashMap<String, usize>,
}

impl Segments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive `count` segments with `interfaces` addresses each.
    pub fn derive(count: u8, interfaces: u16) -> Self {
        let mut segments = Self::new();
        for s in 0..count {
            segments.push(Segment::derive(s, interfaces));
        }
        segments
    }

    /// Append a segment. A later segment with the same bridge name
    /// replaces the earlier one in lookups.
    pub fn push(&mut self, segment: Segment) {
        self.by_bridge
            .insert(segment.bridge_name.clone(), self.list.len());
        self.list.push(segment);
    }

    pub fn get(&self, bridge: &str) -> Option<&Segment> {
        self.by_bridge.get(bridge).map(|&i| &self.list[i])
    }

    pub fn get_mut(&mut self, bridge: &str) -> Option<&mut Segment> {
        match self.by_bridge.get(bridge) {
            Some(&i) => Some(&mut self.list[i]),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Hand out the next guest interface on `bridge`.
    pub fn next_interface(&mut self, bridge: &str) -> Result<Interface> {
        let segment = self
            .get_mut(bridge)
            .ok_or_else(|| LocalnetError::NotFound(format!("no segment for bridge {}", bridge)))?;
        segment
            .take_interface()
            .ok_or_else(|| LocalnetError::LeasesExhausted(bridge.to_string()))
    }

    /// Resolve `address:port` for a service listening on the first IPv4
    /// address of `bridge`'s own interface.
    pub fn endpoint(&self, bridge: &str, port: u16) -> Result<SocketAddrV4> {
        let segment = self
            .get(bridge)
            .ok_or_else(|| LocalnetError::NotFound(format!("no segment for bridge {}", bridge)))?;
        let addr = segment.bridge_if.first_ipv4().ok_or_else(|| {
            LocalnetError::NotFound(format!("bridge {} has no IPv4 address", bridge))
        })?;
        Ok(SocketAddrV4::new(addr, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_to_netmask() {
        assert_eq!(prefix_to_netmask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(16), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(prefix_to_netmask(8), Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(prefix_to_netmask(32), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(prefix_to_netmask(0), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(prefix_to_netmask(28), Ipv4Addr::new(255, 255, 255, 240));
    }

    #[test]
    fn test_mac_display_and_parse() {
        let mac = MacAddr([0x02, 0x00, 0x00, 0x01, 0x01, 0xf4]);
        assert_eq!(mac.to_string(), "02:00:00:01:01:f4");
        assert_eq!("02:00:00:01:01:f4".parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("02:00:00".parse::<MacAddr>().is_err());
        assert!("02:00:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("zz:00:00:00:00:00".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_interface_derive_addresses() {
        let iface = Interface::derive(0, 1, "br0");
        assert_eq!(iface.hardware_addr.to_string(), "02:00:00:00:00:01");
        assert_eq!(iface.ipv4, vec![Ipv4Cidr::new(Ipv4Addr::new(10, 0, 0, 1), 16)]);
        assert_eq!(iface.ipv6[0].addr, "fd00::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(iface.ipv6[0].prefix_len, 64);
        assert_eq!(iface.hostname, "br0-1");
    }

    #[test]
    fn test_interface_derive_high_index() {
        let iface = Interface::derive(2, 300, "br2");
        assert_eq!(iface.hardware_addr.to_string(), "02:00:00:02:01:2c");
        assert_eq!(iface.first_ipv4(), Some(Ipv4Addr::new(10, 2, 1, 44)));
        assert_eq!(iface.ipv6[0].addr, "fd00:2::12c".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_segment_derive_pool() {
        let seg = Segment::derive(0, 5);
        assert_eq!(seg.bridge_name(), "br0");
        assert_eq!(
            seg.bridge_interface().first_ipv4(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        let hosts: Vec<&str> = seg.available().map(|i| i.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["br0-2", "br0-3", "br0-4"]);
    }

    #[test]
    fn test_next_interface_in_order() {
        let mut segments = Segments::derive(1, 4);
        let first = segments.next_interface("br0").unwrap();
        let second = segments.next_interface("br0").unwrap();
        assert_eq!(first.first_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(second.first_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(segments.get("br0").unwrap().remaining(), 0);
    }

    #[test]
    fn test_next_interface_exhausted() {
        let mut segments = Segments::derive(1, 3);
        segments.next_interface("br0").unwrap();
        let err = segments.next_interface("br0").unwrap_err();
        assert!(matches!(err, LocalnetError::LeasesExhausted(ref b) if b == "br0"));
    }

    #[test]
    fn test_next_interface_unknown_bridge() {
        let mut segments = Segments::derive(1, 3);
        let err = segments.next_interface("br9").unwrap_err();
        assert!(matches!(err, LocalnetError::NotFound(_)));
    }

    #[test]
    fn test_endpoint_resolution() {
        let mut segments = Segments::new();
        let bridge_if = Interface::with_ipv4(
            "br0-1",
            &[Ipv4Cidr::new(Ipv4Addr::new(10, 0, 2, 15), 24)],
        );
        segments.push(Segment::new("br0", bridge_if, Vec::new()));

        let endpoint = segments.endpoint("br0", 2379).unwrap();
        assert_eq!(endpoint.to_string(), "10.0.2.15:2379");
    }

    #[test]
    fn test_endpoint_picks_matching_bridge() {
        let segments = Segments::derive(3, 4);
        assert_eq!(segments.endpoint("br2", 2379).unwrap().to_string(), "10.2.0.1:2379");
    }

    #[test]
    fn test_endpoint_missing_bridge_is_not_found() {
        let segments = Segments::derive(1, 4);
        let err = segments.endpoint("br1", 2379).unwrap_err();
        assert!(matches!(err, LocalnetError::NotFound(_)));
    }

    #[test]
    fn test_endpoint_bridge_without_ipv4() {
        let mut segments = Segments::new();
        segments.push(Segment::new(
            "br0",
            Interface::with_ipv4("br0-1", &[]),
            Vec::new(),
        ));
        assert!(matches!(
            segments.endpoint("br0", 2379),
            Err(LocalnetError::NotFound(_))
        ));
    }

    #[test]
    fn test_segments_keep_insertion_order() {
        let segments = Segments::derive(3, 3);
        let names: Vec<&str> = segments.iter().map(|s| s.bridge_name()).collect();
        assert_eq!(names, vec!["br0", "br1", "br2"]);
        assert_eq!(segments.len(), 3);
        assert!(!segments.is_empty());
    }
}
