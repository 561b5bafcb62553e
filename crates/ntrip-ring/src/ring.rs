use crate::invariants::{debug_assert_backlog_cleared, debug_assert_not_caught_up};
use crate::slot::Slot;

/// Fixed-size circular buffer of published byte chunks for a single
/// source, plus the head index naming the slot the producer writes next.
///
/// Ownership: exactly one thread — the owning source's
/// thread — ever touches a `ChunkRing`. There is no internal locking or
/// atomics here; concurrency safety comes from that single-writer
/// discipline, enforced one level up by `ntrip_caster::Source`.
pub struct ChunkRing {
    slots: Vec<Slot>,
    /// Slot the producer will write into next (`cid`, invariant R1).
    cid: usize,
}

impl ChunkRing {
    pub fn new(chunklen: usize, readsize: usize) -> Self {
        assert!(chunklen > 1, "a ring needs at least two slots to be useful");
        assert!(readsize > 0, "SOURCE_READSIZE must be positive");
        let slots = (0..chunklen).map(|_| Slot::empty(readsize)).collect();
        Self { slots, cid: 0 }
    }

    #[inline]
    pub fn chunklen(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn readsize(&self) -> usize {
        self.slots[0].capacity()
    }

    /// The slot the producer is about to write (not yet published).
    #[inline]
    pub fn cid(&self) -> usize {
        self.cid
    }

    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    /// Bytes a client sitting at `(cid, offset)` can deliver right now.
    /// Empty if the client has caught up to the producer.
    pub fn readable(&self, cid: usize, offset: usize) -> &[u8] {
        if cid == self.cid {
            return &[];
        }
        debug_assert_not_caught_up!(cid, self.cid);
        self.slots[cid].bytes_from(offset)
    }

    /// New-client placement: one slot behind the producer.
    pub fn start_chunk(&self) -> usize {
        if self.cid > 0 {
            self.cid - 1
        } else {
            self.chunklen() - 1
        }
    }

    /// Number of clients still holding a cursor into the slot the
    /// producer is about to overwrite.
    pub fn current_backlog(&self) -> usize {
        self.slots[self.cid].clients_left()
    }

    /// Force-clears the backlog counter on the current slot. Callers must
    /// have already evicted (or otherwise accounted for) every client that
    /// still held a cursor into it — this is the second half of the
    /// trailing-kick policy.
    pub fn clear_current_backlog(&mut self) {
        self.slots[self.cid].set_clients_left(0);
    }

    /// Mutable access to the slot currently being filled by the reader,
    /// before it is published.
    pub fn current_slot_mut(&mut self) -> &mut Slot {
        &mut self.slots[self.cid]
    }

    /// Publishes the current slot (sets `len`/`clients_left`, advances
    /// `cid`). The caller must have already cleared any existing backlog
    /// on this slot, e.g. via `clear_current_backlog` (R2).
    pub fn publish(&mut self, len: usize, num_clients: usize) {
        debug_assert_backlog_cleared!(self.slots[self.cid].clients_left());
        let cur = &mut self.slots[self.cid];
        cur.set_len(len);
        cur.set_clients_left(num_clients);
        self.cid = (self.cid + 1) % self.chunklen();
    }

    /// Called by a client that has fully consumed the slot at `cid`
    /// (whether or not any bytes were delivered): drops the slot's
    /// backlog count by one.
    pub fn release_slot(&mut self, cid: usize) {
        self.slots[cid].decrement_clients_left();
    }

    /// Oversized-datagram splitting.
    ///
    /// Publishes as many whole `readsize`-sized slots as `buf` contains,
    /// invoking `on_backlog` (the trailing-kick policy) before overwriting
    /// any slot that still has readers attached. Returns the number of
    /// leftover bytes written into the *current* (not yet published)
    /// slot, to be merged with the next datagram by the caller.
    ///
    /// An input whose length is an exact multiple of `readsize` publishes
    /// that many slots and returns 0 — the ring never leaves a full slot
    /// unpublished.
    pub fn fill_chunks(
        &mut self,
        buf: &[u8],
        num_clients: usize,
        mut on_backlog: impl FnMut(&mut Self),
    ) -> usize {
        let readsize = self.readsize();
        let mut rest = buf;
        while rest.len() >= readsize {
            if self.current_backlog() > 0 {
                on_backlog(self);
            }
            let (head, tail) = rest.split_at(readsize);
            self.current_slot_mut().data_mut()[..readsize].copy_from_slice(head);
            self.publish(readsize, num_clients);
            rest = tail;
        }
        self.current_slot_mut().data_mut()[..rest.len()].copy_from_slice(rest);
        rest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_chunk_wraps_at_zero() {
        let ring = ChunkRing::new(32, 64);
        assert_eq!(ring.start_chunk(), 31);
    }

    #[test]
    fn start_chunk_is_one_behind() {
        let mut ring = ChunkRing::new(4, 8);
        ring.publish(8, 0);
        assert_eq!(ring.cid(), 1);
        assert_eq!(ring.start_chunk(), 0);
    }

    #[test]
    fn publish_advances_and_seeds_backlog() {
        let mut ring = ChunkRing::new(4, 8);
        ring.current_slot_mut().data_mut()[..4].copy_from_slice(b"abcd");
        ring.publish(4, 3);
        assert_eq!(ring.cid(), 1);
        assert_eq!(ring.slot(0).len(), 4);
        assert_eq!(ring.slot(0).clients_left(), 3);
        assert_eq!(ring.slot(0).bytes(), b"abcd");
    }

    #[test]
    fn fill_chunks_exact_multiple_publishes_all_and_returns_zero() {
        let mut ring = ChunkRing::new(8, 1024);
        let buf = vec![7u8; 1024 * 3];
        let remainder = ring.fill_chunks(&buf, 0, |_| {});
        assert_eq!(remainder, 0);
        assert_eq!(ring.cid(), 3);
        for i in 0..3 {
            assert_eq!(ring.slot(i).len(), 1024);
        }
    }

    #[test]
    fn fill_chunks_oversized_rtp_datagram_retains_remainder() {
        // A 3500-byte payload over a 1024-byte readsize.
        let mut ring = ChunkRing::new(8, 1024);
        let buf = vec![1u8; 3500];
        let remainder = ring.fill_chunks(&buf, 2, |_| {});
        assert_eq!(remainder, 428);
        assert_eq!(ring.cid(), 3);
        assert_eq!(ring.current_slot_mut().bytes_from(0).len(), 0); // not yet published
    }

    #[test]
    fn fill_chunks_invokes_backlog_hook_before_overwrite() {
        let mut ring = ChunkRing::new(2, 4);
        ring.publish(4, 1); // slot 0 now has clients_left = 1, cid = 1
        ring.publish(4, 0); // slot 1 published with no readers, cid = 0

        let mut kicked = 0;
        let buf = vec![9u8; 4 * 2];
        ring.fill_chunks(&buf, 0, |r| {
            kicked += 1;
            r.clear_current_backlog();
        });
        assert_eq!(kicked, 1);
    }
}
