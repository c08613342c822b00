//! Error types for the gossip crate.
//!
//! Stale or duplicate values are not errors; they come back from
//! [`GossipTable::insert`](crate::gossip_table::GossipTable::insert) as
//! [`InsertOutcome::Ignored`](crate::gossip_table::InsertOutcome::Ignored)
//! and are turned into prunes and pull exclusions by the caller.

use {solana_pubkey::Pubkey, solana_sanitize::SanitizeError, thiserror::Error};

/// Errors that can occur while building, parsing or routing gossip traffic.
#[derive(Error, Debug)]
pub enum GossipError {
    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A message failed structural validation.
    #[error("sanitize error: {0}")]
    Sanitize(#[from] SanitizeError),

    /// A signature did not verify against its claimed signer.
    #[error("invalid signature from {0}")]
    InvalidSignature(Pubkey),

    /// Serialized message exceeds the packet size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No eligible peers to gossip with.
    #[error("no peers")]
    NoPeers,

    /// A prune message arrived too long after it was signed.
    #[error("prune message timeout")]
    PruneMessageTimeout,

    /// A prune message was addressed to a different node.
    #[error("bad prune destination: {0}")]
    BadPruneDestination(Pubkey),

    /// The local node has no valid gossip socket.
    #[error("invalid gossip address for {0}")]
    InvalidGossipAddress(Pubkey),

    /// A bounded queue between stages was disconnected.
    #[error("channel closed")]
    ChannelClosed,

    /// A bounded queue was full and the caller asked not to block.
    #[error("channel full")]
    ChannelFull,

    /// Failed to spawn a worker thread.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for gossip operations.
pub type Result<T> = std::result::Result<T, GossipError>;
