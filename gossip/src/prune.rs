//! Prune feedback.
//!
//! A node that receives pushed values it already has tells the sender which
//! origins to stop forwarding. The sender remembers those requests per peer
//! as a bloom filter of origin pubkeys and consults it on every push.

use {
    crate::{
        config::PRUNE_MSG_TIMEOUT_MS,
        error::{GossipError, Result},
        gossip_data::MAX_WALLCLOCK,
    },
    serde::{Deserialize, Serialize},
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    solana_signature::Signature,
    solana_signer::Signer,
    std::collections::{hash_map::Entry, HashMap},
    trv1_bloom::Bloom,
};

/// Domain separator prepended to the signed prune payload.
const PRUNE_DATA_PREFIX: &[u8] = b"\xffTRV1_PRUNE_DATA";
/// Origins per prune message, keeping it within one packet.
pub const MAX_PRUNE_DATA_NODES: usize = 32;
/// Peers whose prune filters are retained.
pub const MAX_PRUNE_PEERS: usize = 1024;
/// Expected origins per peer filter; sizes the bloom.
const PRUNE_FILTER_ITEMS: usize = 4096;
const PRUNE_FILTER_FALSE_RATE: f64 = 0.1;
const PRUNE_FILTER_MAX_BITS: usize = 32 * 1024 * 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneData {
    /// Pubkey of the node that sent this prune data.
    pub pubkey: Pubkey,
    /// Origins the sender no longer wants to receive from `destination`.
    pub prunes: Vec<Pubkey>,
    pub signature: Signature,
    /// The node that should stop forwarding.
    pub destination: Pubkey,
    pub wallclock: u64,
}

impl PruneData {
    /// Builds one signed message per `MAX_PRUNE_DATA_NODES` origins.
    pub fn new_signed(
        keypair: &Keypair,
        prunes: Vec<Pubkey>,
        destination: Pubkey,
        wallclock: u64,
    ) -> Vec<Self> {
        prunes
            .chunks(MAX_PRUNE_DATA_NODES)
            .map(|prunes| {
                let mut data = Self {
                    pubkey: keypair.pubkey(),
                    prunes: prunes.to_vec(),
                    signature: Signature::default(),
                    destination,
                    wallclock,
                };
                data.sign(keypair);
                data
            })
            .collect()
    }

    fn signable_data(&self) -> Option<Vec<u8>> {
        bincode::serialize(&(
            PRUNE_DATA_PREFIX,
            &self.pubkey,
            &self.prunes,
            &self.destination,
            self.wallclock,
        ))
        .ok()
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        if let Some(bytes) = self.signable_data() {
            self.signature = keypair.sign_message(&bytes);
        }
    }

    pub fn verify(&self) -> bool {
        self.signable_data()
            .is_some_and(|bytes| self.signature.verify(self.pubkey.as_ref(), &bytes))
    }

    /// Rejects prunes addressed to another node or signed too far from now.
    pub fn check_destination(&self, self_pubkey: &Pubkey, now: u64) -> Result<()> {
        if self.destination != *self_pubkey {
            return Err(GossipError::BadPruneDestination(self.destination));
        }
        if self.wallclock.abs_diff(now) > PRUNE_MSG_TIMEOUT_MS {
            return Err(GossipError::PruneMessageTimeout);
        }
        Ok(())
    }
}

impl Sanitize for PruneData {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        if self.wallclock >= MAX_WALLCLOCK {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.prunes.len() > MAX_PRUNE_DATA_NODES {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        Ok(())
    }
}

struct PruneFilter {
    origins: Bloom<Pubkey>,
    created: u64,
}

/// Remembers, per peer, the origins that peer asked us not to push.
///
/// A peer's filter lives for `prune_timeout_ms` from its first prune; later
/// prunes add to it without extending its life. At most `max_peers` filters
/// are held and the oldest is evicted first.
pub struct PruneTracker {
    prune_timeout_ms: u64,
    max_peers: usize,
    filters: HashMap<Pubkey, PruneFilter>,
}

impl PruneTracker {
    pub fn new(prune_timeout_ms: u64, max_peers: usize) -> Self {
        Self {
            prune_timeout_ms,
            max_peers,
            filters: HashMap::default(),
        }
    }

    fn is_expired(&self, filter: &PruneFilter, now: u64) -> bool {
        now >= filter.created.saturating_add(self.prune_timeout_ms)
    }

    /// Records that `peer` no longer wants values from `origins`.
    pub fn prune(&mut self, peer: Pubkey, origins: &[Pubkey], now: u64) {
        let expired = self
            .filters
            .get(&peer)
            .is_some_and(|filter| self.is_expired(filter, now));
        if expired {
            self.filters.remove(&peer);
        }
        if !self.filters.contains_key(&peer) && self.filters.len() >= self.max_peers {
            self.purge(now);
            if self.filters.len() >= self.max_peers {
                self.evict_oldest();
            }
        }
        let filter = match self.filters.entry(peer) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(PruneFilter {
                origins: Bloom::random(
                    PRUNE_FILTER_ITEMS,
                    PRUNE_FILTER_FALSE_RATE,
                    PRUNE_FILTER_MAX_BITS,
                ),
                created: now,
            }),
        };
        for origin in origins {
            filter.origins.add(origin);
        }
    }

    /// Whether `peer` has asked not to receive values from `origin`.
    /// May return false positives.
    pub fn contains(&self, peer: &Pubkey, origin: &Pubkey, now: u64) -> bool {
        self.filters
            .get(peer)
            .is_some_and(|filter| !self.is_expired(filter, now) && filter.origins.contains(origin))
    }

    /// Drops expired filters. Returns the number dropped.
    pub fn purge(&mut self, now: u64) -> usize {
        let timeout = self.prune_timeout_ms;
        let size = self.filters.len();
        self.filters
            .retain(|_, filter| now < filter.created.saturating_add(timeout));
        size - self.filters.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .filters
            .iter()
            .min_by_key(|(_, filter)| filter.created)
            .map(|(peer, _)| *peer);
        if let Some(peer) = oldest {
            self.filters.remove(&peer);
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
