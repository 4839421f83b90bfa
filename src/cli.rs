//! Command-line surface.

use std::net::Ipv4Addr;

use clap::{ArgGroup, Parser, ValueEnum};
use uuid::Uuid;

/// NIC operation mode (mirrors `vmnet::mode::Mode`, minus its per-mode
/// parameters, which are filled in from the other flags in [`crate::options`]).
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum OperationMode {
    /// NAT to the host network over an internal subnet.
    Shared,
    /// Isolated LAN, optionally with cross-VM isolation.
    Host,
    /// L2-bridged to a named host interface.
    Bridged,
}

/// `version: X\ncommit: Y`, matching the wire format required of
/// `--version`. The commit hash is baked in by `build.rs`.
///
/// clap's own `--version` flag renders as `{bin_name} {version}`, which
/// would prefix the wire format with `vmnet-helper `; `--version` is
/// instead a plain `bool` handled by hand in `main`, the same way
/// `--list-shared-interfaces` is.
pub const VERSION_STRING: &str = concat!(
    "version: ",
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VMNET_HELPER_COMMIT"),
);

#[derive(Parser, Debug)]
#[command(
    name = "vmnet-helper",
    about = "Attaches a VM to the host network via vmnet.framework",
    disable_version_flag = true
)]
// Conflict-only: `--fd`/`--socket` must not both be given. Whether one of
// them is *required* depends on `--version`/`--list-shared-interfaces` also
// being absent, which a plain group can't express, so that's enforced via
// `required_unless_present_any` on each field instead.
#[command(group(ArgGroup::new("socket_source").args(["fd", "socket"])))]
pub struct Args {
    /// Adopt an already-connected datagram socket at this descriptor.
    #[arg(
        long,
        value_name = "N",
        required_unless_present_any = ["socket", "version", "list_shared_interfaces"]
    )]
    pub fd: Option<i32>,

    /// Create and bind a datagram socket at this path, then wait for a client.
    #[arg(
        long,
        value_name = "PATH",
        required_unless_present_any = ["fd", "version", "list_shared_interfaces"]
    )]
    pub socket: Option<String>,

    /// Stable NIC identity; a random UUID is generated if omitted.
    #[arg(long, value_name = "UUID")]
    pub interface_id: Option<Uuid>,

    /// NIC operation mode.
    #[arg(long, value_enum, default_value_t = OperationMode::Shared)]
    pub operation_mode: OperationMode,

    /// Host interface to bridge to. Required iff `--operation-mode=bridged`.
    #[arg(long, value_name = "NAME")]
    pub shared_interface: Option<String>,

    /// Start of the shared-mode IPv4 range.
    #[arg(long, default_value = "192.168.105.1")]
    pub start_address: Ipv4Addr,

    /// End of the shared-mode IPv4 range.
    #[arg(long, default_value = "192.168.105.254")]
    pub end_address: Ipv4Addr,

    /// Subnet mask for the shared-mode IPv4 range.
    #[arg(long, default_value = "255.255.255.0")]
    pub subnet_mask: Ipv4Addr,

    /// Request TCP segmentation offload from the NIC.
    #[arg(long)]
    pub enable_tso: bool,

    /// Request checksum offload from the NIC.
    #[arg(long)]
    pub enable_checksum_offload: bool,

    /// Cross-VM isolation. Only valid with `--operation-mode=host`.
    #[arg(long)]
    pub enable_isolation: bool,

    /// Print the names of interfaces available for bridging, then exit.
    #[arg(long)]
    pub list_shared_interfaces: bool,

    /// Print version and commit information, then exit.
    #[arg(long)]
    pub version: bool,

    /// Emit DEBUG-level log lines.
    #[arg(long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn fd_and_socket_are_mutually_exclusive() {
        let err = Args::try_parse_from(["vmnet-helper", "--fd=3", "--socket=/tmp/x.sock"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn one_of_fd_or_socket_is_required() {
        let err = Args::try_parse_from(["vmnet-helper"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn fd_alone_parses() {
        let args = Args::try_parse_from(["vmnet-helper", "--fd=3"]).unwrap();
        assert_eq!(args.fd, Some(3));
        assert_eq!(args.operation_mode, OperationMode::Shared);
    }

    #[test]
    fn version_flag_parses_without_fd_or_socket() {
        let args = Args::try_parse_from(["vmnet-helper", "--version"]).unwrap();
        assert!(args.version);
    }

    #[test]
    fn list_shared_interfaces_parses_without_fd_or_socket() {
        let args = Args::try_parse_from(["vmnet-helper", "--list-shared-interfaces"]).unwrap();
        assert!(args.list_shared_interfaces);
    }
}
