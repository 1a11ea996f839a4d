//! Link configuration through interface ioctls.
//!
//! A [`LinkSocket`] is a datagram socket used only as an ioctl target. The
//! kernel binds a socket to the network namespace of the thread that created
//! it, so every operation on a `LinkSocket` applies to that namespace no
//! matter which thread issues it later. Open it inside the namespace scope.

use std::ffi::CString;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use localnet_core::error::{LocalnetError, Result};
use localnet_core::segment::{Ipv4Cidr, Ipv6Cidr, MacAddr};

// Legacy bridge ioctls (linux/sockios.h)
const SIOCBRADDBR: libc::c_ulong = 0x89a0;
const SIOCBRADDIF: libc::c_ulong = 0x89a2;

// ethtool (linux/sockios.h, linux/ethtool.h)
const SIOCETHTOOL: libc::c_ulong = 0x8946;
const ETHTOOL_GDRVINFO: u32 = 0x0000_0003;

const ARPHRD_ETHER: libc::sa_family_t = 1;

/// Driver name the kernel reports for bridge devices.
const BRIDGE_DRIVER: &str = "bridge";

/// `struct ethtool_drvinfo`
#[repr(C)]
#[allow(dead_code)]
struct EthtoolDrvinfo {
    cmd: u32,
    driver: [u8; 32],
    version: [u8; 32],
    fw_version: [u8; 32],
    bus_info: [u8; 32],
    erom_version: [u8; 32],
    reserved2: [u8; 12],
    n_priv_flags: u32,
    n_stats: u32,
    testinfo_len: u32,
    eedump_len: u32,
    regdump_len: u32,
}

/// `struct in6_ifreq`
#[repr(C)]
struct In6Ifreq {
    ifr6_addr: libc::in6_addr,
    ifr6_prefixlen: u32,
    ifr6_ifindex: libc::c_int,
}

/// Socket handle for link ioctls in one network namespace.
#[derive(Debug)]
pub struct LinkSocket {
    fd: OwnedFd,
}

impl LinkSocket {
    /// Open an ioctl socket in the calling thread's namespace.
    pub fn open() -> Result<Self> {
        Self::open_family(libc::AF_INET)
    }

    fn open_family(family: libc::c_int) -> Result<Self> {
        let fd = unsafe { libc::socket(family, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(LocalnetError::last_os_error("socket for link ioctl"));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ioctl<T>(&self, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, arg as *mut T) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Interface index of `name`.
    pub fn index(&self, name: &str) -> Result<u32> {
        let mut ifr = ifreq(name)?;
        self.ioctl(libc::SIOCGIFINDEX, &mut ifr)
            .map_err(|e| link_error("SIOCGIFINDEX", name, e))?;
        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex } as u32)
    }

    /// Driver name of `name`, or `None` when the device does not report one
    /// (loopback, for instance).
    pub fn driver(&self, name: &str) -> Result<Option<String>> {
        let mut info: EthtoolDrvinfo = unsafe { std::mem::zeroed() };
        info.cmd = ETHTOOL_GDRVINFO;

        let mut ifr = ifreq(name)?;
        ifr.ifr_ifru.ifru_data = &mut info as *mut EthtoolDrvinfo as *mut libc::c_char;

        match self.ioctl(SIOCETHTOOL, &mut ifr) {
            Ok(()) => Ok(Some(c_bytes_to_string(&info.driver))),
            Err(e) if e.raw_os_error() == Some(libc::EOPNOTSUPP) => Ok(None),
            Err(e) => Err(link_error("SIOCETHTOOL", name, e)),
        }
    }

    /// Whether `name` exists and is a bridge. Missing links are `NotFound`.
    pub fn is_bridge(&self, name: &str) -> Result<bool> {
        self.index(name)?;
        Ok(self.driver(name)?.as_deref() == Some(BRIDGE_DRIVER))
    }

    fn flags(&self, name: &str) -> Result<libc::c_short> {
        let mut ifr = ifreq(name)?;
        self.ioctl(libc::SIOCGIFFLAGS, &mut ifr)
            .map_err(|e| link_error("SIOCGIFFLAGS", name, e))?;
        Ok(unsafe { ifr.ifr_ifru.ifru_flags })
    }

    /// Whether `name` is administratively up.
    pub fn is_up(&self, name: &str) -> Result<bool> {
        Ok(self.flags(name)? & libc::IFF_UP as libc::c_short != 0)
    }

    /// Set or clear the administrative up flag.
    pub fn set_up(&self, name: &str, up: bool) -> Result<()> {
        let mut ifr = ifreq(name)?;
        let flags = self.flags(name)?;
        ifr.ifr_ifru.ifru_flags = if up {
            flags | libc::IFF_UP as libc::c_short
        } else {
            flags & !(libc::IFF_UP as libc::c_short)
        };
        self.ioctl(libc::SIOCSIFFLAGS, &mut ifr)
            .map_err(|e| link_error("SIOCSIFFLAGS", name, e))
    }

    /// Create a bridge device.
    pub fn add_bridge(&self, name: &str) -> Result<()> {
        ifreq(name)?;
        let cname = CString::new(name)
            .map_err(|_| LocalnetError::Resource(format!("invalid interface name '{}'", name)))?;
        let ret = unsafe {
            libc::ioctl(self.fd.as_raw_fd(), SIOCBRADDBR as _, cname.as_ptr())
        };
        if ret < 0 {
            return Err(LocalnetError::last_os_error(format!("SIOCBRADDBR {}", name)));
        }
        tracing::debug!(bridge = name, "Created bridge");
        Ok(())
    }

    /// Make interface `port_index` a port of `bridge`.
    pub fn add_bridge_port(&self, bridge: &str, port_index: u32) -> Result<()> {
        let mut ifr = ifreq(bridge)?;
        ifr.ifr_ifru.ifru_ifindex = port_index as libc::c_int;
        self.ioctl(SIOCBRADDIF, &mut ifr).map_err(|e| {
            LocalnetError::Resource(format!(
                "SIOCBRADDIF {} <- ifindex {}: {}",
                bridge, port_index, e
            ))
        })
    }

    pub fn set_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        let mut ifr = ifreq(name)?;
        ifr.ifr_ifru.ifru_mtu = mtu as libc::c_int;
        self.ioctl(libc::SIOCSIFMTU, &mut ifr)
            .map_err(|e| link_error("SIOCSIFMTU", name, e))
    }

    pub fn set_hwaddr(&self, name: &str, mac: MacAddr) -> Result<()> {
        let mut ifr = ifreq(name)?;
        unsafe {
            ifr.ifr_ifru.ifru_hwaddr.sa_family = ARPHRD_ETHER;
            for (dst, src) in ifr.ifr_ifru.ifru_hwaddr.sa_data.iter_mut().zip(mac.0) {
                *dst = src as libc::c_char;
            }
        }
        self.ioctl(libc::SIOCSIFHWADDR, &mut ifr)
            .map_err(|e| link_error("SIOCSIFHWADDR", name, e))
    }

    /// Assign the primary IPv4 address and netmask.
    pub fn set_ipv4(&self, name: &str, cidr: Ipv4Cidr) -> Result<()> {
        let mut ifr = ifreq(name)?;
        write_sockaddr_in(&mut ifr, cidr.addr);
        self.ioctl(libc::SIOCSIFADDR, &mut ifr)
            .map_err(|e| link_error("SIOCSIFADDR", name, e))?;

        write_sockaddr_in(&mut ifr, cidr.netmask());
        self.ioctl(libc::SIOCSIFNETMASK, &mut ifr)
            .map_err(|e| link_error("SIOCSIFNETMASK", name, e))
    }

    /// Add an IPv6 address. The inet6 socket this needs is opened on the
    /// calling thread, so call it inside the namespace scope.
    pub fn add_ipv6(&self, name: &str, cidr: Ipv6Cidr) -> Result<()> {
        let index = self.index(name)?;
        let v6 = Self::open_family(libc::AF_INET6)?;

        let mut req: In6Ifreq = unsafe { std::mem::zeroed() };
        req.ifr6_addr.s6_addr = cidr.addr.octets();
        req.ifr6_prefixlen = u32::from(cidr.prefix_len);
        req.ifr6_ifindex = index as libc::c_int;

        v6.ioctl(libc::SIOCSIFADDR, &mut req)
            .map_err(|e| link_error("SIOCSIFADDR (inet6)", name, e))
    }
}

/// Build an `ifreq` naming `name`.
pub(crate) fn ifreq(name: &str) -> Result<libc::ifreq> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.contains('\0') {
        return Err(LocalnetError::Resource(format!(
            "invalid interface name '{}'",
            name
        )));
    }
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = src as libc::c_char;
    }
    Ok(ifr)
}

/// Read the interface name back out of an `ifreq`.
pub(crate) fn ifreq_name(ifr: &libc::ifreq) -> String {
    let bytes: Vec<u8> = ifr
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn write_sockaddr_in(ifr: &mut libc::ifreq, ip: Ipv4Addr) {
    let addr = sockaddr_in(ip);
    unsafe {
        std::ptr::copy_nonoverlapping(
            &addr as *const libc::sockaddr_in as *const u8,
            &mut ifr.ifr_ifru as *mut _ as *mut u8,
            std::mem::size_of::<libc::sockaddr_in>(),
        );
    }
}

fn sockaddr_in(ip: Ipv4Addr) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_addr.s_addr = u32::from(ip).to_be();
    addr
}

fn c_bytes_to_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Missing devices are `NotFound`; everything else is a resource failure.
fn link_error(op: &str, name: &str, e: io::Error) -> LocalnetError {
    if e.raw_os_error() == Some(libc::ENODEV) {
        LocalnetError::NotFound(format!("link {}", name))
    } else {
        LocalnetError::Resource(format!("{} {}: {}", op, name, e))
    }
}
