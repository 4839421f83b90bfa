//! Shared test fixture: a fake in-memory NIC wired to the real forwarding
//! engine via a connected `UnixDatagram` pair standing in for the VM socket.
//! The harness-side peer is adopted exactly the way fd-mode adopts a
//! pre-connected descriptor, so these tests exercise the real `VmSocket`
//! code path rather than a bypass built only for tests.

#![allow(dead_code)]

use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixDatagram;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use vmnet_helper::forward::{self, SharedNic};
use vmnet_helper::nic::fake::{self, FakeNicHandle};
use vmnet_helper::reactor::{Reactor, ShutdownCause};
use vmnet_helper::vm_socket::VmSocket;

pub const MAX_PACKET_SIZE: usize = 1514;

pub struct Harness {
    pub nic: FakeNicHandle,
    pub vm_peer: UnixDatagram,
    pub reactor: Reactor,
    wake_tx: Sender<u64>,
    host_handle: Option<JoinHandle<()>>,
    vm_handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start() -> Harness {
        let (fake_nic, nic_handle) = fake::pair(MAX_PACKET_SIZE);
        let shared_nic: SharedNic = Arc::new(Mutex::new(Box::new(fake_nic)));

        let (here, there) = UnixDatagram::pair().unwrap();
        let vm_socket = Arc::new(VmSocket::adopt_fd(here.into_raw_fd(), false).unwrap());

        let reactor = Reactor::new().unwrap();
        let (host_handle, wake_tx) = forward::spawn_host_loop(
            shared_nic.clone(),
            vm_socket.clone(),
            MAX_PACKET_SIZE,
            reactor.poster(),
        );
        let vm_handle = forward::spawn_vm_loop(
            shared_nic,
            vm_socket,
            MAX_PACKET_SIZE,
            reactor.poster(),
        );

        Harness {
            nic: nic_handle,
            vm_peer: there,
            reactor,
            wake_tx,
            host_handle: Some(host_handle),
            vm_handle: Some(vm_handle),
        }
    }

    /// Queues `frame` on the fake NIC's ingress side and wakes the host
    /// loop, standing in for the framework's packets-available callback.
    pub fn inject_from_nic(&self, frame: Vec<u8>) {
        self.nic.inbound_tx.send(frame).unwrap();
        self.wake_tx.send(1).unwrap();
    }

    pub fn recv_from_vm_peer(&self) -> Vec<u8> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = self.vm_peer.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    pub fn recv_from_nic_egress(&self) -> Vec<u8> {
        self.nic.outbound_rx.recv().unwrap()
    }

    /// Stands in for the VM peer departing: a zero-length datagram, since
    /// AF_UNIX datagram sockets have no connection-oriented shutdown signal
    /// a dropped socket alone would deliver.
    pub fn close_vm_peer(&self) {
        self.vm_peer.send(&[]).unwrap();
    }

    pub fn wait_for_shutdown(&self) -> ShutdownCause {
        self.reactor.wait_for_shutdown()
    }

    pub fn join(mut self) {
        drop(self.wake_tx);
        if let Some(h) = self.host_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.vm_handle.take() {
            let _ = h.join();
        }
    }
}
