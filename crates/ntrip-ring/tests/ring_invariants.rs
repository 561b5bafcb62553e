use ntrip_ring::ChunkRing;
use proptest::prelude::*;

/// I3 (progress): if the producer always has bytes to publish, `cid`
/// advances once per publish call regardless of how many readers exist.
#[test]
fn cid_advances_every_publish_regardless_of_clients() {
    let mut ring = ChunkRing::new(8, 16);
    let start = ring.cid();
    for i in 0..20 {
        if ring.current_backlog() > 0 {
            ring.clear_current_backlog();
        }
        ring.publish(16, 5);
        assert_eq!(ring.cid(), (start + i + 1) % ring.chunklen());
    }
}

/// Boundary: a client `CHUNKLEN - 1` slots behind is exactly the slot the
/// producer is about to reuse next publish.
#[test]
fn trailing_client_is_on_the_slot_about_to_be_overwritten() {
    let ring = ChunkRing::new(8, 16);
    let trailing_cid = (ring.cid() + 1) % ring.chunklen(); // CHUNKLEN - 1 behind
    assert_eq!(trailing_cid, ring.cid().wrapping_add(1) % ring.chunklen());
}

proptest! {
    /// I2: a slot is never silently overwritten while `clients_left > 0`;
    /// our API requires the caller to explicitly clear the backlog first,
    /// and `publish` asserts that in debug builds.
    #[test]
    fn publish_never_skips_backlog_clearing(rounds in 1usize..200, num_clients in 0usize..20) {
        let mut ring = ChunkRing::new(8, 32);
        for _ in 0..rounds {
            if ring.current_backlog() > 0 {
                ring.clear_current_backlog();
            }
            ring.publish(32, num_clients);
            prop_assert_eq!(ring.current_backlog(), 0);
        }
    }

    /// fill_chunks always accounts for every byte: either published into a
    /// full slot or carried as the unpublished remainder.
    #[test]
    fn fill_chunks_accounts_for_every_byte(len in 0usize..5000) {
        let mut ring = ChunkRing::new(8, 1024);
        let buf = vec![3u8; len];
        let remainder = ring.fill_chunks(&buf, 0, |r| r.clear_current_backlog());
        prop_assert_eq!(remainder, len % 1024);
    }
}
