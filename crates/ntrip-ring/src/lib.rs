//! Chunk ring and client cursor protocol for the NTRIP caster.
//!
//! This crate is the single hottest data structure in the caster: a
//! fixed-size ring of byte chunks owned exclusively by
//! one source's thread, plus the `Cursor` type each client uses to track
//! how far into that ring it has read. It does no I/O and knows nothing
//! about sockets, mountpoints, or threads — those live in `ntrip-caster`.

mod cursor;
mod invariants;
mod ring;
mod slot;

pub use cursor::Cursor;
pub use ring::ChunkRing;
pub use slot::Slot;
