#![allow(clippy::arithmetic_side_effects)]

//! Probabilistic set membership used by the gossip protocol.
//!
//! Pull requests advertise "what I already have" as a [`Bloom`] over value
//! hashes, and the prune tracker remembers which origins a peer no longer
//! wants as a [`Bloom`] over public keys. Both only need `AsRef<[u8]>` keys.

pub mod bloom;

pub use bloom::{Bloom, BloomHashIndex};
