//! vmnet.framework-backed [`NicAdapter`](super::NicAdapter), via the safe
//! `vmnet` crate wrapper over `Interface`/`Batch`/`Options`/`Mode`.

use vmnet::mode::common::SubnetOptions;
use vmnet::mode::{Bridged, Host, Mode, Shared};
use vmnet::parameters::{Parameter, ParameterKind};
use vmnet::{Batch, Events, Interface, Options};

use super::{NicAdapter, NicConfig, NicError, NicInfo, NicResult, PacketsAvailableCallback};
use crate::cli::OperationMode;

pub struct VmnetNic {
    interface: Interface,
    batch: Batch,
    max_packet_size: usize,
}

fn to_mode(config: &NicConfig) -> Mode {
    match config.operation_mode {
        OperationMode::Shared => Mode::Shared(Shared {
            subnet_options: Some(SubnetOptions {
                start_address: config.shared_range.start_address.to_string(),
                end_address: config.shared_range.end_address.to_string(),
                subnet_mask: config.shared_range.subnet_mask.to_string(),
            }),
            nat66_prefix: None,
            mtu: None,
        }),
        OperationMode::Host => Mode::Host(Host {
            configuration: None,
            mtu: None,
        }),
        OperationMode::Bridged => Mode::Bridged(Bridged {
            // Options::from_args already rejected bridged mode without this set.
            shared_interface_name: config.shared_interface.clone().unwrap_or_default(),
        }),
    }
}

fn to_options(config: &NicConfig) -> Options {
    Options {
        allocate_mac_address: None,
        enable_checksum_offload: Some(config.enable_checksum_offload),
        enable_isolation: Some(config.enable_isolation),
        enable_tso: Some(config.enable_tso),
        interface_id: Some(config.interface_id),
    }
}

fn get_u64(interface: &Interface, kind: ParameterKind) -> NicResult<u64> {
    match interface.parameters().get(kind) {
        Some(Parameter::MTU(v)) | Some(Parameter::MaxPacketSize(v)) => Ok(v),
        _ => Err(NicError::Start(format!(
            "missing or wrong-typed parameter: {kind:?}"
        ))),
    }
}

fn get_string(interface: &Interface, kind: ParameterKind) -> NicResult<String> {
    match interface.parameters().get(kind) {
        Some(Parameter::MACAddress(v)) => Ok(v),
        _ => Err(NicError::Start(format!(
            "missing or wrong-typed parameter: {kind:?}"
        ))),
    }
}

pub fn start(config: &NicConfig) -> NicResult<(Box<dyn NicAdapter>, NicInfo)> {
    let interface = Interface::new(to_mode(config), to_options(config))
        .map_err(|e| NicError::Start(e.to_string()))?;

    // This crate version's Options -> Vec<Parameter> conversion only wires
    // enable_isolation and interface_id through; allocate_mac_address,
    // enable_checksum_offload and enable_tso are silently dropped.
    if config.enable_tso || config.enable_checksum_offload {
        tracing::warn!(
            "requested NIC offloads (TSO/checksum) are not wired through by the vmnet crate; ignoring"
        );
    }

    let max_packet_size = get_u64(&interface, ParameterKind::MaxPacketSize)? as usize;
    let mtu = get_u64(&interface, ParameterKind::MTU)?;
    let mac_address = get_string(&interface, ParameterKind::MACAddress)?;

    let info = NicInfo {
        vmnet_mac_address: mac_address,
        vmnet_mtu: mtu,
        vmnet_max_packet_size: max_packet_size as u64,
        vmnet_interface_id: config.interface_id,
    };

    let batch = Batch::preallocate(crate::buffer::MAX_PACKET_COUNT);

    Ok((
        Box::new(VmnetNic {
            interface,
            batch,
            max_packet_size,
        }),
        info,
    ))
}

impl NicAdapter for VmnetNic {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn read_batch(
        &mut self,
        bufs: &mut [&mut [u8]],
        lengths_out: &mut [usize],
    ) -> NicResult<usize> {
        let count = match self.interface.read_batch(&mut self.batch, bufs) {
            Ok(count) => count,
            Err(vmnet::Error::VmnetReadNothing) => 0,
            Err(e) => return Err(NicError::Io(e.to_string())),
        };
        for (len_out, size) in lengths_out.iter_mut().zip(self.batch.packet_sizes()).take(count) {
            *len_out = size;
        }
        Ok(count)
    }

    fn write_batch(&mut self, bufs: &[&[u8]]) -> NicResult<usize> {
        self.interface
            .write_batch(&mut self.batch, bufs)
            .map_err(|e| NicError::Io(e.to_string()))
    }

    fn set_packets_available_callback(&mut self, cb: PacketsAvailableCallback) -> NicResult<()> {
        self.interface
            .set_event_callback(Events::PACKETS_AVAILABLE, move |_events, params| {
                let estimate = match params.get(ParameterKind::EstimatedPacketsAvailable) {
                    Some(Parameter::EstimatedPacketsAvailable(n)) => n,
                    _ => 0,
                };
                cb(estimate);
            })
            .map_err(|e| NicError::Start(e.to_string()))
    }

    fn stop(&mut self) -> NicResult<()> {
        self.interface
            .finalize()
            .map_err(|e| NicError::Stop(e.to_string()))
    }
}

pub fn shared_interface_list() -> Vec<String> {
    vmnet::shared_interface_list()
}
