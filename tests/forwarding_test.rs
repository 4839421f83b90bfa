//! End-to-end exercises of the forwarding engine: fake NIC on one side, a
//! real connected `UnixDatagram` standing in for the VM on the other.

mod harness;

use harness::Harness;

#[test]
fn host_to_vm_delivers_many_frames_in_order() {
    let h = Harness::start();

    const COUNT: u32 = 10_000;
    for tag in 0..COUNT {
        h.inject_from_nic(tag.to_be_bytes().to_vec());
    }

    for tag in 0..COUNT {
        let frame = h.recv_from_vm_peer();
        assert_eq!(frame, tag.to_be_bytes());
    }

    h.close_vm_peer();
    assert!(!h.wait_for_shutdown().is_failure());
    h.join();
}

#[test]
fn vm_to_host_delivers_many_frames_in_order() {
    let h = Harness::start();

    const COUNT: u32 = 2_000;
    for tag in 0..COUNT {
        h.vm_peer.send(&tag.to_be_bytes()).unwrap();
    }

    for tag in 0..COUNT {
        let frame = h.recv_from_nic_egress();
        assert_eq!(frame, tag.to_be_bytes());
    }

    h.close_vm_peer();
    assert!(!h.wait_for_shutdown().is_failure());
    h.join();
}

#[test]
fn host_to_vm_survives_a_backlogged_peer() {
    // Frames are queued well ahead of the peer draining them, approaching
    // the socket's own buffer limits and giving the ENOBUFS retry path a
    // chance to engage without asserting it necessarily does.
    let h = Harness::start();

    const COUNT: u32 = 4_000;
    const FRAME_LEN: usize = 1400;
    for tag in 0..COUNT {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&tag.to_be_bytes());
        h.inject_from_nic(frame);
    }

    let mut received = Vec::with_capacity(COUNT as usize);
    for _ in 0..COUNT {
        let frame = h.recv_from_vm_peer();
        assert_eq!(frame.len(), FRAME_LEN);
        received.push(u32::from_be_bytes(frame[..4].try_into().unwrap()));
    }
    assert_eq!(received, (0..COUNT).collect::<Vec<_>>());

    h.close_vm_peer();
    assert!(!h.wait_for_shutdown().is_failure());
    h.join();
}
