//! Network plumbing inside a cluster namespace.
//!
//! Provides `LinkSocket` for link configuration (bridges, addresses, flags)
//! and `VirtualInterface` for TAP devices handed to guest VMs.

mod link;
mod tap;

pub use link::LinkSocket;
pub use tap::{TapConfig, VirtualInterface};
