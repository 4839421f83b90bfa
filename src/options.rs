//! Immutable options record, built by validating parsed [`crate::cli::Args`].

use std::net::Ipv4Addr;

use uuid::Uuid;

use crate::cli::{Args, OperationMode};
use crate::error::{DaemonError, Result};

/// How the VM-facing datagram socket is obtained.
#[derive(Debug, Clone)]
pub enum SocketSource {
    /// Adopt an already-connected descriptor; no bind, no lockfile.
    Fd(i32),
    /// Create, bind, chmod, and wait for a client at this path.
    Path(String),
}

#[derive(Debug, Clone)]
pub struct SharedRange {
    pub start_address: Ipv4Addr,
    pub end_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

/// Validated, immutable configuration for one daemon run.
#[derive(Debug, Clone)]
pub struct Options {
    pub socket_source: SocketSource,
    pub interface_id: Uuid,
    pub operation_mode: OperationMode,
    pub shared_interface: Option<String>,
    pub shared_range: SharedRange,
    pub enable_tso: bool,
    pub enable_checksum_offload: bool,
    pub enable_isolation: bool,
    pub verbose: bool,
}

impl Options {
    /// Validates `args` and builds the immutable record, or returns a
    /// [`DaemonError::Config`] describing the first violated constraint.
    ///
    /// Called only after `--list-shared-interfaces` and `--version` have
    /// already been handled by the caller, since those exit before any NIC
    /// or socket configuration is needed.
    pub fn from_args(args: Args) -> Result<Self> {
        let socket_source = match (args.fd, args.socket) {
            (Some(fd), None) => SocketSource::Fd(fd),
            (None, Some(path)) => SocketSource::Path(path),
            // clap's ArgGroup already rejects both-missing and both-present,
            // but Options must not assume its caller always goes through clap.
            (Some(_), Some(_)) => {
                return Err(DaemonError::Config(
                    "--fd and --socket are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(DaemonError::Config(
                    "exactly one of --fd or --socket is required".into(),
                ));
            }
        };

        if args.operation_mode == OperationMode::Bridged && args.shared_interface.is_none() {
            return Err(DaemonError::Config(
                "--operation-mode=bridged requires --shared-interface".into(),
            ));
        }

        if args.enable_isolation && args.operation_mode != OperationMode::Host {
            return Err(DaemonError::Config(
                "--enable-isolation is only valid with --operation-mode=host".into(),
            ));
        }

        Ok(Options {
            socket_source,
            interface_id: args.interface_id.unwrap_or_else(Uuid::new_v4),
            operation_mode: args.operation_mode,
            shared_interface: args.shared_interface,
            shared_range: SharedRange {
                start_address: args.start_address,
                end_address: args.end_address,
                subnet_mask: args.subnet_mask,
            },
            enable_tso: args.enable_tso,
            enable_checksum_offload: args.enable_checksum_offload,
            enable_isolation: args.enable_isolation,
            verbose: args.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once(&"vmnet-helper").chain(argv)).unwrap()
    }

    #[test]
    fn bridged_without_shared_interface_is_rejected() {
        let args = parse(&["--fd=3", "--operation-mode=bridged"]);
        let err = Options::from_args(args).unwrap_err();
        assert!(matches!(err, DaemonError::Config(msg) if msg.contains("shared-interface")));
    }

    #[test]
    fn isolation_without_host_mode_is_rejected() {
        let args = parse(&["--fd=3", "--enable-isolation", "--operation-mode=shared"]);
        let err = Options::from_args(args).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn isolation_with_host_mode_is_accepted() {
        let args = parse(&["--fd=3", "--enable-isolation", "--operation-mode=host"]);
        assert!(Options::from_args(args).is_ok());
    }

    #[test]
    fn missing_interface_id_generates_random_uuid() {
        let args = parse(&["--fd=3"]);
        let opts = Options::from_args(args).unwrap();
        assert_ne!(opts.interface_id, Uuid::nil());
    }

    #[test]
    fn explicit_interface_id_is_preserved() {
        let id = Uuid::new_v4();
        let args = parse(&["--fd=3", "--interface-id", &id.to_string()]);
        let opts = Options::from_args(args).unwrap();
        assert_eq!(opts.interface_id, id);
    }

    #[test]
    fn fd_mode_has_no_path() {
        let args = parse(&["--fd=3"]);
        let opts = Options::from_args(args).unwrap();
        assert!(matches!(opts.socket_source, SocketSource::Fd(3)));
    }

    #[test]
    fn socket_mode_carries_path() {
        let args = parse(&["--socket=/tmp/t.sock"]);
        let opts = Options::from_args(args).unwrap();
        assert!(matches!(opts.socket_source, SocketSource::Path(p) if p == "/tmp/t.sock"));
    }
}
