//! Lifecycle controller: sequences startup, client attach, privilege drop,
//! forwarding start, termination wait, and teardown.
//!
//! ```text
//! INIT -> KQ_UP -> NIC_UP -> PRIV_DROPPED -> SOCKET_ATTACHED ->
//! HOST_FWD_ARMED -> VM_FWD_RUNNING -> WAITING ->
//! (signal | shutdown event) -> STOPPING -> NIC_DOWN -> EXIT
//! ```
//!
//! There is no `State` enum: each stage below is a function called in
//! sequence, matching the original's linear `main()` rather than an
//! explicit state machine object, since nothing here is re-entered or
//! driven by external events except the single wait in `WAITING`.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use nix::unistd::{Gid, Uid};

use crate::error::DaemonError;
use crate::forward::{self, SharedNic};
use crate::lockfile::Lockfile;
use crate::nic::{self, NicConfig, NicInfo};
use crate::options::{Options, SocketSource};
use crate::reactor::Reactor;
use crate::vm_socket::{self, VmSocket};

pub struct Daemon {
    options: Options,
}

impl Daemon {
    pub fn new(options: Options) -> Self {
        Daemon { options }
    }

    /// Runs the daemon to completion. Returns the process exit code; never
    /// returns `Err` once forwarding has started, since everything past
    /// `SOCKET_ATTACHED` is reported through the shutdown-flag mechanism
    /// instead.
    pub fn run(self) -> anyhow::Result<i32> {
        let reactor = Reactor::new()?;

        let nic_config = NicConfig {
            operation_mode: self.options.operation_mode,
            shared_interface: self.options.shared_interface.clone(),
            shared_range: self.options.shared_range.clone(),
            interface_id: self.options.interface_id,
            enable_tso: self.options.enable_tso,
            enable_checksum_offload: self.options.enable_checksum_offload,
            enable_isolation: self.options.enable_isolation,
        };
        let (nic_adapter, nic_info) =
            nic::start(&nic_config).map_err(|e| DaemonError::NicStart(e.to_string()))?;
        write_vmnet_info(&nic_info)?;

        drop_privileges()?;

        let lockfile = match &self.options.socket_source {
            SocketSource::Path(path) => Some(Lockfile::acquire(path)?),
            SocketSource::Fd(_) => None,
        };

        let has_bulk_forwarding = vm_socket::has_bulk_forwarding();
        let vm_socket = match &self.options.socket_source {
            SocketSource::Fd(fd) => VmSocket::adopt_fd(*fd, has_bulk_forwarding)?,
            SocketSource::Path(path) => {
                VmSocket::bind_path(path, &reactor, has_bulk_forwarding)?
            }
        };
        let vm_socket = Arc::new(vm_socket);

        let shared_nic: SharedNic = Arc::new(Mutex::new(nic_adapter));
        let max_packet_size = nic_info.vmnet_max_packet_size as usize;

        let (_host_handle, wake_tx) = forward::spawn_host_loop(
            shared_nic.clone(),
            vm_socket.clone(),
            max_packet_size,
            reactor.poster(),
        );
        {
            let mut nic = shared_nic.lock().unwrap();
            nic.set_packets_available_callback(Box::new(move |estimate| {
                let _ = wake_tx.send(estimate);
            }))
            .map_err(|e| DaemonError::NicStart(e.to_string()))?;
        }

        let _vm_handle = forward::spawn_vm_loop(
            shared_nic.clone(),
            vm_socket,
            max_packet_size,
            reactor.poster(),
        );

        let cause = reactor.wait_for_shutdown();
        tracing::info!(?cause, "shutting down");

        {
            let mut nic = shared_nic.lock().unwrap();
            if let Err(e) = nic.stop() {
                let err = DaemonError::NicStop(e.to_string());
                tracing::warn!(error = %err, "NIC stop reported an error");
            }
        }

        if let SocketSource::Path(path) = &self.options.socket_source
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, "failed to remove socket file");
        }
        if let Some(lockfile) = lockfile {
            lockfile
                .remove()
                .context("failed to remove socket lockfile on exit")?;
        }

        Ok(if cause.is_failure() { 1 } else { 0 })
    }
}

/// Emits the framework-reported interface metadata as one JSON line on
/// stdout, immediately after NIC start.
fn write_vmnet_info(info: &NicInfo) -> anyhow::Result<()> {
    let line = serde_json::to_string(info).context("failed to serialize vmnet info record")?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{line}").context("failed to write vmnet info record")?;
    handle.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Drops to `SUDO_UID`/`SUDO_GID` if set and non-empty, else the real
/// uid/gid. Order matters: group first, since dropping the user id first
/// would remove the privilege needed to change the group.
fn drop_privileges() -> anyhow::Result<()> {
    let target_uid = resolve_id("SUDO_UID", Uid::current().as_raw());
    let target_gid = resolve_id("SUDO_GID", Gid::current().as_raw());

    nix::unistd::setgid(Gid::from_raw(target_gid))
        .map_err(|e| DaemonError::PrivilegeDrop(e.to_string()))?;
    nix::unistd::setuid(Uid::from_raw(target_uid))
        .map_err(|e| DaemonError::PrivilegeDrop(e.to_string()))?;

    tracing::info!(
        uid = Uid::current().as_raw(),
        gid = Gid::current().as_raw(),
        "dropped privileges"
    );
    Ok(())
}

fn resolve_id(env_var: &str, fallback: u32) -> u32 {
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_id_falls_back_when_env_var_absent() {
        unsafe { std::env::remove_var("VMNET_HELPER_TEST_ID") };
        assert_eq!(resolve_id("VMNET_HELPER_TEST_ID", 42), 42);
    }

    #[test]
    fn resolve_id_falls_back_when_env_var_empty() {
        unsafe { std::env::set_var("VMNET_HELPER_TEST_ID", "") };
        assert_eq!(resolve_id("VMNET_HELPER_TEST_ID", 42), 42);
        unsafe { std::env::remove_var("VMNET_HELPER_TEST_ID") };
    }

    #[test]
    fn resolve_id_prefers_env_var_when_present() {
        unsafe { std::env::set_var("VMNET_HELPER_TEST_ID", "1000") };
        assert_eq!(resolve_id("VMNET_HELPER_TEST_ID", 42), 1000);
        unsafe { std::env::remove_var("VMNET_HELPER_TEST_ID") };
    }
}
