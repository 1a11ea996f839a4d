//! TAP devices for guest network adapters.
//!
//! TAP devices are created through `/dev/net/tun` and the `TUNSETIFF` ioctl.
//! The device is not persistent: it exists while its file descriptor is
//! open, so a [`VirtualInterface`] owns the fd and the device disappears
//! when the interface is dropped, unless the fd has been handed on to a
//! hypervisor.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use localnet_core::error::{LocalnetError, Result};

use super::link::{ifreq, ifreq_name, LinkSocket};

// ioctl constants
const TUNSETIFF: libc::c_ulong = 0x400454ca;

// TUN/TAP flags
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFF_VNET_HDR: libc::c_short = 0x4000;

/// TAP device configuration.
#[derive(Debug, Clone, Default)]
pub struct TapConfig {
    /// Device name (None lets the kernel pick `tapN`).
    pub name: Option<String>,
    /// Enable the virtio-net header.
    pub vnet_hdr: bool,
}

impl TapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_vnet_hdr(mut self, enabled: bool) -> Self {
        self.vnet_hdr = enabled;
        self
    }
}

/// A TAP device handed to VM backends.
///
/// Carries its own link socket, opened in the namespace the device was
/// created in, so state queries and up/down work from any thread.
#[derive(Debug)]
pub struct VirtualInterface {
    name: String,
    index: u32,
    bridge: Option<String>,
    tap: OwnedFd,
    link: LinkSocket,
}

impl VirtualInterface {
    /// Create a TAP device in the calling thread's namespace.
    pub fn create(config: &TapConfig) -> Result<Self> {
        let link = LinkSocket::open()?;

        let fd = unsafe {
            libc::open(
                b"/dev/net/tun\0".as_ptr().cast::<libc::c_char>(),
                libc::O_RDWR | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(LocalnetError::last_os_error("open /dev/net/tun"));
        }
        let tap = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut ifr = match config.name {
            Some(ref name) => ifreq(name)?,
            None => unsafe { std::mem::zeroed() },
        };
        let mut flags = IFF_TAP | IFF_NO_PI;
        if config.vnet_hdr {
            flags |= IFF_VNET_HDR;
        }
        ifr.ifr_ifru.ifru_flags = flags;

        let ret = unsafe { libc::ioctl(tap.as_raw_fd(), TUNSETIFF as _, &mut ifr) };
        if ret < 0 {
            return Err(LocalnetError::Resource(format!(
                "TUNSETIFF {} failed: {}",
                config.name.as_deref().unwrap_or("tap%d"),
                io::Error::last_os_error()
            )));
        }

        let name = ifreq_name(&ifr);
        let index = link.index(&name)?;

        tracing::info!(tap = %name, ifindex = index, "Created TAP device");

        Ok(Self {
            name,
            index,
            bridge: None,
            tap,
            link,
        })
    }

    /// Make this device a port of `bridge`.
    ///
    /// Fails with `NotFound` when no link is named `bridge`, `NotABridge`
    /// when it exists but is some other kind of device, and `Resource` when
    /// the kernel refuses the port.
    pub fn attach_to_bridge(&mut self, bridge: &str) -> Result<()> {
        if !self.link.is_bridge(bridge)? {
            return Err(LocalnetError::NotABridge(bridge.to_string()));
        }
        self.link.add_bridge_port(bridge, self.index)?;
        self.bridge = Some(bridge.to_string());

        tracing::debug!(tap = %self.name, bridge, "Attached TAP device to bridge");
        Ok(())
    }

    /// Bring the device administratively up.
    pub fn activate(&self) -> Result<()> {
        self.link.set_up(&self.name, true)?;
        tracing::debug!(tap = %self.name, "Brought up TAP device");
        Ok(())
    }

    /// Bring the device administratively down.
    pub fn deactivate(&self) -> Result<()> {
        self.link.set_up(&self.name, false)?;
        tracing::debug!(tap = %self.name, "Brought down TAP device");
        Ok(())
    }

    pub fn is_up(&self) -> Result<bool> {
        self.link.is_up(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Bridge this device was attached to, if any.
    pub fn bridge(&self) -> Option<&str> {
        self.bridge.as_deref()
    }

    /// Duplicate the TAP fd, e.g. to pass it to a hypervisor as an
    /// inherited descriptor.
    pub fn try_clone_fd(&self) -> Result<OwnedFd> {
        Ok(self.tap.try_clone()?)
    }

    /// Give up the device, keeping only its fd.
    pub fn into_fd(self) -> OwnedFd {
        tracing::debug!(tap = %self.name, "Handing off TAP device");
        self.tap
    }
}

impl AsFd for VirtualInterface {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.tap.as_fd()
    }
}
