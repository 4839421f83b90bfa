//! NIC adapter: a thin facade over the host virtualization networking
//! framework (vmnet.framework on macOS).

use thiserror::Error;
use uuid::Uuid;

use crate::cli::OperationMode;
use crate::options::SharedRange;

#[cfg(target_os = "macos")]
mod vmnet_backend;

pub mod fake;

/// Errors a NIC call can fail with, mapped from the framework's own status
/// enum to a stable textual name so log lines stay meaningful across
/// framework versions.
#[derive(Debug, Error)]
pub enum NicError {
    #[error("{0}")]
    Start(String),
    #[error("{0}")]
    Stop(String),
    #[error("{0}")]
    Io(String),
}

pub type NicResult<T> = std::result::Result<T, NicError>;

#[derive(Debug, Clone)]
pub struct NicConfig {
    pub operation_mode: OperationMode,
    pub shared_interface: Option<String>,
    pub shared_range: SharedRange,
    pub interface_id: Uuid,
    pub enable_tso: bool,
    pub enable_checksum_offload: bool,
    pub enable_isolation: bool,
}

/// Framework-reported interface metadata, emitted verbatim as the startup
/// JSON record (see [`crate::lifecycle::write_vmnet_info`]).
#[derive(Debug, Clone, serde::Serialize)]
pub struct NicInfo {
    pub vmnet_mac_address: String,
    pub vmnet_mtu: u64,
    pub vmnet_max_packet_size: u64,
    pub vmnet_interface_id: Uuid,
}

/// Callback invoked on the `host` queue when the NIC has ingress frames
/// queued; carries the framework's estimated pending-packet count.
pub type PacketsAvailableCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Operations the forwarding engine and lifecycle controller need from the
/// NIC, independent of which framework backs it.
pub trait NicAdapter: Send {
    fn max_packet_size(&self) -> usize;

    /// Reads up to `bufs.len()` frames, recording each received frame's
    /// length in the matching slot of `lengths_out`. Returns the count
    /// actually read.
    fn read_batch(&mut self, bufs: &mut [&mut [u8]], lengths_out: &mut [usize]) -> NicResult<usize>;

    /// Writes `bufs.len()` frames, each already truncated to its payload
    /// length. Returns the count actually accepted.
    fn write_batch(&mut self, bufs: &[&[u8]]) -> NicResult<usize>;

    /// Registers the "packets available" callback. May be called once.
    fn set_packets_available_callback(&mut self, cb: PacketsAvailableCallback) -> NicResult<()>;

    /// Synchronously stops the interface. Idempotent.
    fn stop(&mut self) -> NicResult<()>;
}

/// Starts the NIC for `config`, returning the adapter and the
/// framework-reported metadata used to size the endpoint pools and build
/// the startup JSON record.
#[cfg(target_os = "macos")]
pub fn start(config: &NicConfig) -> NicResult<(Box<dyn NicAdapter>, NicInfo)> {
    vmnet_backend::start(config)
}

#[cfg(not(target_os = "macos"))]
pub fn start(_config: &NicConfig) -> NicResult<(Box<dyn NicAdapter>, NicInfo)> {
    Err(NicError::Start(
        "vmnet.framework is only available on macOS".into(),
    ))
}

/// Names of interfaces available for `--operation-mode=bridged`.
#[cfg(target_os = "macos")]
pub fn shared_interface_list() -> Vec<String> {
    vmnet_backend::shared_interface_list()
}

#[cfg(not(target_os = "macos"))]
pub fn shared_interface_list() -> Vec<String> {
    Vec::new()
}
