//! Library crate backing the `vmnet-helper` binary: attaches a VM to the
//! host network via vmnet.framework and forwards Ethernet frames between
//! the NIC and a local datagram socket.

pub mod buffer;
pub mod cli;
pub mod error;
pub mod forward;
pub mod lifecycle;
pub mod lockfile;
pub mod logging;
pub mod nic;
pub mod options;
pub mod reactor;
pub mod vm_socket;
