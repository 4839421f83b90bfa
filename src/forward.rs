//! Bidirectional forwarding engine: two independent one-way pipes between
//! the NIC and the VM socket, each driven by its own `host`/`vm` thread.
//!
//! The NIC adapter is shared between both threads (`host` reads from it,
//! `vm` writes to it) behind a mutex — the real `vmnet::Interface` gives no
//! stronger concurrency guarantee than "safe to call from multiple
//! threads", so the lock serializes the two calls rather than relying on
//! unproven internal synchronization.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::Endpoint;
use crate::nic::NicAdapter;
use crate::reactor::{ShutdownCause, ShutdownPoster};
use crate::vm_socket::VmSocket;

/// No kernel wait primitive exists for `ENOBUFS`; this is the only internal
/// timed wait in the forwarding path.
const RETRY_DELAY: Duration = Duration::from_micros(50);

pub type SharedNic = Arc<Mutex<Box<dyn NicAdapter>>>;

/// Spawns the `host` thread (NIC → VM). Returns its handle plus the sender
/// the NIC's packets-available callback uses to wake it; the estimate it
/// carries is informational only, the loop always drains to zero.
pub fn spawn_host_loop(
    nic: SharedNic,
    vm_socket: Arc<VmSocket>,
    max_packet_size: usize,
    poster: ShutdownPoster,
) -> (JoinHandle<()>, Sender<u64>) {
    let (wake_tx, wake_rx) = crossbeam_channel::unbounded::<u64>();
    let handle = std::thread::Builder::new()
        .name("host".into())
        .spawn(move || host_loop(nic, vm_socket, max_packet_size, wake_rx, poster))
        .expect("failed to spawn host thread");
    (handle, wake_tx)
}

/// Spawns the `vm` thread (VM → NIC); it blocks indefinitely on the socket.
pub fn spawn_vm_loop(
    nic: SharedNic,
    vm_socket: Arc<VmSocket>,
    max_packet_size: usize,
    poster: ShutdownPoster,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("vm".into())
        .spawn(move || vm_loop(nic, vm_socket, max_packet_size, poster))
        .expect("failed to spawn vm thread")
}

fn host_loop(
    nic: SharedNic,
    vm_socket: Arc<VmSocket>,
    max_packet_size: usize,
    wake_rx: Receiver<u64>,
    poster: ShutdownPoster,
) {
    let mut endpoint = Endpoint::new(max_packet_size);
    let capacity = endpoint.capacity();
    let mut lengths = vec![0usize; capacity];

    // Each wakeup means the NIC had at least one frame queued; drain until
    // it reports zero rather than trusting the estimate.
    while wake_rx.recv().is_ok() {
        loop {
            let n = {
                let mut bufs = endpoint.bufs_mut(capacity);
                let mut nic = nic.lock().unwrap();
                match nic.read_batch(&mut bufs, &mut lengths) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "[host->vm] read_batch failed");
                        poster.post(ShutdownCause::HostLoopError);
                        return;
                    }
                }
            };
            if n == 0 {
                break;
            }
            for (i, len) in lengths.iter().enumerate().take(n) {
                endpoint.set_slot_len(i, *len);
            }
            send_to_vm(&vm_socket, &endpoint, n);
        }
    }
}

fn send_to_vm(vm_socket: &VmSocket, endpoint: &Endpoint, n: usize) {
    let start = if vm_socket.has_bulk_forwarding() {
        send_to_vm_fast(vm_socket, endpoint, n)
    } else {
        0
    };
    send_to_vm_slow(vm_socket, endpoint, start, n);
}

/// Batched `sendmsg_x` loop, advancing the offset by the kernel-returned
/// count. A non-`ENOBUFS` error stops the fast path and returns the offset
/// of the first unsent frame, which the caller then routes through the
/// per-frame slow path rather than dropping.
fn send_to_vm_fast(vm_socket: &VmSocket, endpoint: &Endpoint, n: usize) -> usize {
    let mut offset = 0;
    while offset < n {
        let tail = &endpoint.slots(n)[offset..];
        match vm_socket.write_batch_fast(tail) {
            Ok(0) => std::thread::sleep(RETRY_DELAY),
            Ok(sent) => offset += sent,
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                std::thread::sleep(RETRY_DELAY);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    remaining = n - offset,
                    "[host->vm] batched send failed, falling back to slow path"
                );
                break;
            }
        }
    }
    offset
}

/// Per-frame `write` of slots `[start, n)`, retrying on `ENOBUFS` with
/// unbounded back-pressure and dropping (logging, never escalating) on any
/// other error.
fn send_to_vm_slow(vm_socket: &VmSocket, endpoint: &Endpoint, start: usize, n: usize) {
    for i in start..n {
        let frame = endpoint.slot(i);
        loop {
            match vm_socket.write_single(frame) {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                    std::thread::sleep(RETRY_DELAY);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "[host->vm] dropped frame");
                    break;
                }
            }
        }
    }
}

fn vm_loop(nic: SharedNic, vm_socket: Arc<VmSocket>, max_packet_size: usize, poster: ShutdownPoster) {
    let mut endpoint = Endpoint::new(max_packet_size);
    let capacity = endpoint.capacity();

    loop {
        let n = if vm_socket.has_bulk_forwarding() {
            match read_from_vm_fast(&vm_socket, &mut endpoint, capacity) {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "[vm->host] recvmsg_x failed");
                    poster.post(ShutdownCause::VmLoopError);
                    return;
                }
            }
        } else {
            endpoint.reset_lengths(1);
            match vm_socket.read_single(endpoint.slot_buf_mut(0)) {
                Ok(0) => 0,
                Ok(len) => {
                    endpoint.set_slot_len(0, len);
                    1
                }
                Err(e) => {
                    tracing::error!(error = %e, "[vm->host] read failed");
                    poster.post(ShutdownCause::VmLoopError);
                    return;
                }
            }
        };

        if n == 0 {
            poster.post(ShutdownCause::VmLoopStopped);
            return;
        }

        let bufs = endpoint.slots(n);
        let result = nic.lock().unwrap().write_batch(&bufs);
        if let Err(e) = result {
            tracing::error!(error = %e, "[vm->host] write_batch failed");
            poster.post(ShutdownCause::VmLoopError);
            return;
        }
    }
}

fn read_from_vm_fast(
    vm_socket: &VmSocket,
    endpoint: &mut Endpoint,
    capacity: usize,
) -> std::io::Result<usize> {
    endpoint.reset_lengths(capacity);
    let mut lengths = vec![0usize; capacity];
    let n = {
        let mut bufs = endpoint.bufs_mut(capacity);
        vm_socket.read_batch_fast(&mut bufs, &mut lengths)?
    };
    for (i, len) in lengths.into_iter().enumerate().take(n) {
        endpoint.set_slot_len(i, len);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::fake;

    #[test]
    fn host_loop_forwards_frames_to_vm_socket_in_order() {
        let (fake_nic, handle) = fake::pair(1514);
        let nic: SharedNic = Arc::new(Mutex::new(Box::new(fake_nic)));
        let (vm_sock_here, vm_sock_there) = std::os::unix::net::UnixDatagram::pair().unwrap();
        let vm_socket = Arc::new(VmSocket::from_connected_for_test(vm_sock_here));

        let reactor = crate::reactor::Reactor::new().unwrap();
        let poster = reactor.poster();
        let (handle_thread, wake_tx) =
            spawn_host_loop(nic, vm_socket, 1514, poster);

        handle.inbound_tx.send(vec![1, 2, 3]).unwrap();
        handle.inbound_tx.send(vec![4, 5]).unwrap();
        wake_tx.send(2).unwrap();

        let mut buf = [0u8; 1514];
        let n = vm_sock_there.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = vm_sock_there.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[4, 5]);

        drop(wake_tx);
        handle_thread.join().unwrap();
    }

    #[test]
    fn vm_loop_posts_stopped_on_peer_close() {
        let (fake_nic, _handle) = fake::pair(1514);
        let nic: SharedNic = Arc::new(Mutex::new(Box::new(fake_nic)));
        let (vm_sock_here, vm_sock_there) = std::os::unix::net::UnixDatagram::pair().unwrap();
        let vm_socket = Arc::new(VmSocket::from_connected_for_test(vm_sock_here));

        let reactor = crate::reactor::Reactor::new().unwrap();
        let poster = reactor.poster();
        let handle = spawn_vm_loop(nic, vm_socket, 1514, poster);

        // A zero-length datagram is the portable stand-in for "peer
        // closed": AF_UNIX datagram sockets have no connection-oriented
        // shutdown signal, so a dropped peer alone never unblocks a
        // pending recv().
        vm_sock_there.send(&[]).unwrap();
        assert!(!reactor.wait_for_shutdown().is_failure());
        handle.join().unwrap();
    }
}
