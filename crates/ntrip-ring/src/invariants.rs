//! Debug assertion macros for chunk ring invariants.
//!
//! These document the ring's core safety invariants (R1-R3, I2, I4): a
//! slot's reader backlog must be cleared before it is overwritten, a
//! slot's length is only meaningful to a cursor that isn't caught up to
//! the producer, and a cursor only ever advances by wraparound. They are
//! only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

/// R2: a slot must have its reader backlog cleared before the producer
/// is allowed to overwrite it.
///
/// Used in: `ChunkRing::publish` right after the caller claims to have
/// evicted trailing readers.
macro_rules! debug_assert_backlog_cleared {
    ($clients_left:expr) => {
        debug_assert!(
            $clients_left == 0,
            "R2 violated: overwriting slot with {} readers still attached",
            $clients_left
        )
    };
}

/// R3: `len` of a slot is only meaningful for a client whose cursor
/// names that slot and who has not caught up to the producer.
macro_rules! debug_assert_not_caught_up {
    ($cursor_cid:expr, $producer_cid:expr) => {
        debug_assert!(
            $cursor_cid != $producer_cid,
            "R3 violated: reading len of slot {} the producer is still writing",
            $cursor_cid
        )
    };
}

/// I4: a cursor must never jump backwards relative to the producer
/// except via the wraparound that `advance_slot` performs.
macro_rules! debug_assert_cursor_advanced {
    ($old_cid:expr, $new_cid:expr, $chunklen:expr) => {
        debug_assert!(
            $new_cid == ($old_cid + 1) % $chunklen,
            "I4 violated: cursor slot jumped from {} to {} (chunklen {})",
            $old_cid,
            $new_cid,
            $chunklen
        )
    };
}

pub(crate) use debug_assert_backlog_cleared;
pub(crate) use debug_assert_cursor_advanced;
pub(crate) use debug_assert_not_caught_up;
