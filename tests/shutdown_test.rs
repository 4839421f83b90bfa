//! Termination scenarios: a clean peer close versus a NIC-side failure, and
//! their effect on the shutdown-cause classification used for the process
//! exit code.

mod harness;

use harness::Harness;

#[test]
fn vm_peer_departing_is_a_clean_shutdown() {
    let h = Harness::start();
    h.close_vm_peer();
    let cause = h.wait_for_shutdown();
    assert!(!cause.is_failure());
    h.join();
}

#[test]
fn oversized_frame_from_nic_is_a_fatal_shutdown() {
    let h = Harness::start();

    // Exceeds the harness's MAX_PACKET_SIZE, which the fake NIC rejects as
    // malformed rather than silently truncating.
    h.inject_from_nic(vec![0u8; harness::MAX_PACKET_SIZE + 1]);

    let cause = h.wait_for_shutdown();
    assert!(cause.is_failure());
    h.close_vm_peer();
    h.join();
}
