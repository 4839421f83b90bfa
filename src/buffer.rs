//! Endpoint buffer pool.
//!
//! Pre-allocates a fixed arena of packet slots so that the forwarding hot
//! path never allocates. Each slot's buffer is the single owner of its
//! bytes; the NIC-side and socket-side descriptor layouts (`vmnet::Batch`
//! and our own `msghdr_x` array, see [`crate::vm_socket`]) are non-owning
//! views rebuilt from this pool immediately before each syscall.

/// vmnet_read()/vmnet_write() can move up to 256 packets per call, and the
/// batched socket syscalls document no limit, but measurement (iperf3 at
/// line rate) shows no gain past 64 and a measurable cost above it.
pub const MAX_PACKET_COUNT: usize = 64;

/// A single pre-allocated frame buffer plus the length actually in use.
struct Slot {
    buf: Box<[u8]>,
    len: usize,
}

/// One direction's worth of pre-allocated packet slots.
///
/// The daemon owns two of these, `host` (NIC → VM) and `vm` (VM → NIC);
/// each is only ever touched from the thread driving that direction.
pub struct Endpoint {
    slots: Vec<Slot>,
    max_packet_size: usize,
}

impl Endpoint {
    /// Allocates `MAX_PACKET_COUNT` slots of `max_packet_size` bytes each.
    ///
    /// `max_packet_size` comes from the NIC's reported parameters and is
    /// only known after the interface starts, so this cannot happen at
    /// compile time. Allocation failure here is fatal at startup.
    pub fn new(max_packet_size: usize) -> Self {
        let slots = (0..MAX_PACKET_COUNT)
            .map(|_| Slot {
                buf: vec![0u8; max_packet_size].into_boxed_slice(),
                len: 0,
            })
            .collect();
        Endpoint {
            slots,
            max_packet_size,
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Resets the first `n` slots' logical length to `max_packet_size`,
    /// i.e. "this buffer can receive up to a full frame". Must be called
    /// before any read that fills these slots.
    pub fn reset_lengths(&mut self, n: usize) {
        for slot in &mut self.slots[..n] {
            slot.len = self.max_packet_size;
        }
    }

    /// Full-capacity mutable view of slot `i`, for a read syscall to fill.
    pub fn slot_buf_mut(&mut self, i: usize) -> &mut [u8] {
        &mut self.slots[i].buf
    }

    /// The portion of slot `i` actually holding a frame.
    pub fn slot(&self, i: usize) -> &[u8] {
        &self.slots[i].buf[..self.slots[i].len]
    }

    pub fn slot_len(&self, i: usize) -> usize {
        self.slots[i].len
    }

    /// Records how many bytes slot `i` actually holds, e.g. after a read
    /// reports the received length, or before a write reports how much to
    /// send.
    pub fn set_slot_len(&mut self, i: usize, len: usize) {
        debug_assert!(len <= self.max_packet_size);
        self.slots[i].len = len;
    }

    /// Full-capacity mutable views of the first `n` slots, for a batched
    /// read syscall to fill in one call.
    pub fn bufs_mut(&mut self, n: usize) -> Vec<&mut [u8]> {
        self.slots[..n].iter_mut().map(|s| &mut s.buf[..]).collect()
    }

    /// Read-only views of the first `n` slots, each truncated to its
    /// recorded length, for a batched write syscall to send.
    pub fn slots(&self, n: usize) -> Vec<&[u8]> {
        (0..n).map(|i| self.slot(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_endpoint_has_max_packet_count_slots() {
        let ep = Endpoint::new(1514);
        assert_eq!(ep.capacity(), MAX_PACKET_COUNT);
        assert_eq!(ep.max_packet_size(), 1514);
    }

    #[test]
    fn reset_lengths_prepares_slots_for_read() {
        let mut ep = Endpoint::new(1514);
        ep.reset_lengths(4);
        for i in 0..4 {
            assert_eq!(ep.slot_len(i), 1514);
        }
        assert_eq!(ep.slot_len(5), 0);
    }

    #[test]
    fn set_slot_len_truncates_slot_view() {
        let mut ep = Endpoint::new(1514);
        ep.slot_buf_mut(0)[..3].copy_from_slice(b"abc");
        ep.set_slot_len(0, 3);
        assert_eq!(ep.slot(0), b"abc");
    }
}
