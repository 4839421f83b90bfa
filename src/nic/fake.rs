//! In-memory [`NicAdapter`] standing in for vmnet.framework in the
//! integration-test harness, so the forwarding engine can be exercised
//! without macOS or root.

use crossbeam_channel::{Receiver, Sender};

use super::{NicAdapter, NicError, NicResult, PacketsAvailableCallback};

pub struct FakeNic {
    max_packet_size: usize,
    inbound_rx: Receiver<Vec<u8>>,
    outbound_tx: Sender<Vec<u8>>,
    callback: Option<PacketsAvailableCallback>,
}

/// The test harness's half of a [`FakeNic`]: feed frames in as if they
/// arrived on the wire, and observe frames the daemon wrote out to it.
pub struct FakeNicHandle {
    pub inbound_tx: Sender<Vec<u8>>,
    pub outbound_rx: Receiver<Vec<u8>>,
}

/// Creates a connected fake NIC and its harness-side handle.
pub fn pair(max_packet_size: usize) -> (FakeNic, FakeNicHandle) {
    let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
    let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
    (
        FakeNic {
            max_packet_size,
            inbound_rx,
            outbound_tx,
            callback: None,
        },
        FakeNicHandle {
            inbound_tx,
            outbound_rx,
        },
    )
}

impl FakeNic {
    /// Invokes the registered "packets available" callback, as the real
    /// framework would after queuing ingress frames. The harness calls this
    /// itself after sending on `inbound_tx`.
    pub fn notify_packets_available(&self, estimate: u64) {
        if let Some(cb) = &self.callback {
            cb(estimate);
        }
    }
}

impl NicAdapter for FakeNic {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn read_batch(
        &mut self,
        bufs: &mut [&mut [u8]],
        lengths_out: &mut [usize],
    ) -> NicResult<usize> {
        let mut count = 0;
        for (buf, len_out) in bufs.iter_mut().zip(lengths_out.iter_mut()) {
            match self.inbound_rx.try_recv() {
                Ok(frame) => {
                    if frame.len() > buf.len() {
                        return Err(NicError::Io("frame exceeds max_packet_size".into()));
                    }
                    buf[..frame.len()].copy_from_slice(&frame);
                    *len_out = frame.len();
                    count += 1;
                }
                Err(_) => break,
            }
        }
        Ok(count)
    }

    fn write_batch(&mut self, bufs: &[&[u8]]) -> NicResult<usize> {
        for buf in bufs {
            self.outbound_tx
                .send(buf.to_vec())
                .map_err(|e| NicError::Io(e.to_string()))?;
        }
        Ok(bufs.len())
    }

    fn set_packets_available_callback(&mut self, cb: PacketsAvailableCallback) -> NicResult<()> {
        self.callback = Some(cb);
        Ok(())
    }

    fn stop(&mut self) -> NicResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_batch_drains_available_frames() {
        let (mut nic, handle) = pair(1514);
        handle.inbound_tx.send(vec![1, 2, 3]).unwrap();
        handle.inbound_tx.send(vec![4, 5]).unwrap();

        let mut a = [0u8; 1514];
        let mut b = [0u8; 1514];
        let mut bufs: Vec<&mut [u8]> = vec![&mut a, &mut b];
        let mut lengths = [0usize; 2];

        let n = nic.read_batch(&mut bufs, &mut lengths).unwrap();
        assert_eq!(n, 2);
        assert_eq!(lengths, [3, 2]);
        assert_eq!(&a[..3], &[1, 2, 3]);
    }

    #[test]
    fn read_batch_returns_zero_when_empty() {
        let (mut nic, _handle) = pair(1514);
        let mut a = [0u8; 1514];
        let mut bufs: Vec<&mut [u8]> = vec![&mut a];
        let mut lengths = [0usize; 1];
        assert_eq!(nic.read_batch(&mut bufs, &mut lengths).unwrap(), 0);
    }

    #[test]
    fn write_batch_forwards_to_handle() {
        let (mut nic, handle) = pair(1514);
        nic.write_batch(&[&[9, 9, 9]]).unwrap();
        assert_eq!(handle.outbound_rx.recv().unwrap(), vec![9, 9, 9]);
    }
}
