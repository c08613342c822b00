//! Pull-based reconciliation.
//!
//! A node summarizes what it already has as a set of bloom filters, each
//! covering the slice of hash space that shares a `mask_bits` prefix, and
//! sends every filter to a random peer. The peer answers with the values in
//! that slice that are not in the filter. Bloom false positives only cause a
//! value to be skipped for one round.

use {
    crate::{
        config::GossipConfig,
        contact_info::ContactInfo,
        error::{GossipError, Result},
        gossip_table::{GossipRoute, GossipTable, InsertOutcome},
        gossip_value::SignedGossipData,
    },
    log::trace,
    rand::{seq::SliceRandom, Rng},
    rayon::prelude::*,
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    std::{
        net::SocketAddr,
        sync::atomic::{AtomicI64, Ordering},
    },
    trv1_bloom::Bloom,
};

/// Bytes budgeted for the bloom filter inside a pull request packet.
pub const MAX_BLOOM_SIZE: usize = 928;
/// Target false positive rate of each filter.
pub const FALSE_RATE: f64 = 0.1;
/// Number of hash functions assumed when sizing filters.
pub const KEYS: f64 = 8f64;
/// Values this far ahead of the requester's own wallclock are withheld.
pub const PULL_RESPONSE_WALLCLOCK_JITTER: u64 = crate::config::PULL_RESPONSE_TIMEOUT_MS / 4;

/// A bloom filter over the value hashes that share a prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipFilter {
    pub filter: Bloom<Hash>,
    /// Leading `mask_bits` bits select the covered slice; the rest are ones.
    pub mask: u64,
    pub mask_bits: u32,
}

impl Default for GossipFilter {
    fn default() -> Self {
        Self {
            filter: Bloom::random(0, FALSE_RATE, 1),
            mask: !0u64,
            mask_bits: 0,
        }
    }
}

impl Sanitize for GossipFilter {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        if self.mask_bits >= u64::BITS {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        self.filter.sanitize()
    }
}

impl GossipFilter {
    /// Sizes a filter for `num_items` entries within `max_bytes`, covering a
    /// randomly chosen slice of the hash space.
    pub fn new_rand(num_items: usize, max_bytes: usize) -> Self {
        let max_bits = (max_bytes * 8) as f64;
        let max_items = Self::max_items(max_bits, FALSE_RATE, KEYS);
        let mask_bits = Self::mask_bits(num_items as f64, max_items);
        let filter = Bloom::random(max_items as usize, FALSE_RATE, max_bits as usize);
        let seed: u64 = rand::rng().random_range(0..1u64 << mask_bits);
        let mask = Self::compute_mask(seed, mask_bits);
        Self {
            filter,
            mask,
            mask_bits,
        }
    }

    /// Number of items a `max_bits` filter can hold at `false_rate` with
    /// `num_keys` hash functions.
    pub fn max_items(max_bits: f64, false_rate: f64, num_keys: f64) -> f64 {
        let m = max_bits;
        let p = false_rate;
        let k = num_keys;
        (m / (-k / (1f64 - (p.ln() / k).exp()).ln())).ceil()
    }

    /// Prefix width so that `num_items` split across `2^mask_bits` filters
    /// keeps each under `max_items`.
    pub fn mask_bits(num_items: f64, max_items: f64) -> u32 {
        (num_items / max_items).log2().ceil().max(0.0) as u32
    }

    /// Places `index` in the leading `mask_bits` bits and sets the rest.
    pub fn compute_mask(index: u64, mask_bits: u32) -> u64 {
        debug_assert!(mask_bits == u64::BITS || index < 1u64 << mask_bits);
        let index = index.checked_shl(u64::BITS - mask_bits).unwrap_or(0);
        index | (!0u64).checked_shr(mask_bits).unwrap_or(0)
    }

    /// Interprets the leading eight bytes of the hash as a little-endian
    /// integer. Pull masks and table shards both use this.
    pub fn hash_as_u64(hash: &Hash) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&hash.as_ref()[..8]);
        u64::from_le_bytes(buf)
    }

    /// Whether the hash falls within the slice this filter covers.
    pub fn test_mask(&self, hash: &Hash) -> bool {
        let ones = (!0u64).checked_shr(self.mask_bits).unwrap_or(0);
        Self::hash_as_u64(hash) | ones == self.mask
    }

    pub fn filter_contains(&self, hash: &Hash) -> bool {
        self.filter.contains(hash)
    }

    #[cfg(test)]
    fn add(&mut self, hash: &Hash) {
        if self.test_mask(hash) {
            self.filter.add(hash);
        }
    }
}

/// `2^mask_bits` filters that together cover the whole hash space.
struct GossipFilterSet {
    filters: Vec<Bloom<Hash>>,
    mask_bits: u32,
}

impl GossipFilterSet {
    fn new<R: Rng>(rng: &mut R, num_items: usize, max_bytes: usize) -> Self {
        let max_bits = (max_bytes * 8) as f64;
        let max_items = GossipFilter::max_items(max_bits, FALSE_RATE, KEYS);
        let mask_bits = GossipFilter::mask_bits(num_items as f64, max_items);
        let filters = std::iter::repeat_with(|| {
            Bloom::random_with(&mut *rng, max_items as usize, FALSE_RATE, max_bits as usize)
        })
        .take(1 << mask_bits)
        .collect();
        Self { filters, mask_bits }
    }

    fn add(&mut self, hash: &Hash) {
        let index = GossipFilter::hash_as_u64(hash)
            .checked_shr(u64::BITS - self.mask_bits)
            .unwrap_or(0);
        self.filters[index as usize].add(hash);
    }
}

impl From<GossipFilterSet> for Vec<GossipFilter> {
    fn from(set: GossipFilterSet) -> Self {
        let mask_bits = set.mask_bits;
        set.filters
            .into_iter()
            .enumerate()
            .map(|(index, filter)| GossipFilter {
                filter,
                mask: GossipFilter::compute_mask(index as u64, mask_bits),
                mask_bits,
            })
            .collect()
    }
}

/// Outcome counts of processing one pull response.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessPullStats {
    pub inserted: usize,
    pub failed: usize,
    pub timeout: usize,
}

pub struct GossipPull {
    pull_response_timeout_ms: u64,
    max_pull_requests: usize,
}

impl GossipPull {
    pub fn new(config: &GossipConfig) -> Self {
        Self {
            pull_response_timeout_ms: config.pull_response_timeout_ms,
            max_pull_requests: config.max_pull_requests,
        }
    }

    /// Builds filters covering every value in the table plus the purged and
    /// failed hashes, so none of them is sent back.
    pub fn build_filters<R: Rng>(&self, rng: &mut R, table: &GossipTable) -> Vec<GossipFilter> {
        let num_items = table.len() + table.num_purged() + table.num_failed_pull_hashes();
        let mut filters = GossipFilterSet::new(rng, num_items, MAX_BLOOM_SIZE);
        for record in table.values() {
            filters.add(&record.value_hash);
        }
        for hash in table.purged().chain(table.failed_pull_hashes()) {
            filters.add(&hash);
        }
        filters.into()
    }

    /// Assigns filters to peers chosen uniformly at random. Sends at most
    /// `max_pull_requests` filters, a random subset when there are more.
    pub fn new_pull_requests<R: Rng>(
        &self,
        rng: &mut R,
        table: &GossipTable,
        peers: &[ContactInfo],
    ) -> Result<Vec<(SocketAddr, GossipFilter)>> {
        let peers: Vec<SocketAddr> = peers.iter().filter_map(ContactInfo::gossip).collect();
        if peers.is_empty() {
            return Err(GossipError::NoPeers);
        }
        let mut filters = self.build_filters(rng, table);
        if filters.len() > self.max_pull_requests {
            filters.shuffle(rng);
            filters.truncate(self.max_pull_requests);
        }
        Ok(filters
            .into_iter()
            .map(|filter| (peers[rng.random_range(0..peers.len())], filter))
            .collect())
    }

    /// Returns, for each request, the values the caller is missing.
    ///
    /// Requests whose caller wallclock is outside the pull timeout window are
    /// answered with nothing. At most `output_size_limit` values are returned
    /// across all requests.
    pub fn generate_pull_responses(
        &self,
        table: &GossipTable,
        requests: &[(SignedGossipData, GossipFilter)],
        output_size_limit: usize,
        now: u64,
    ) -> Vec<Vec<SignedGossipData>> {
        let timeout = self.pull_response_timeout_ms;
        let caller_wallclock_window = now.saturating_sub(timeout)..now.saturating_add(timeout);
        let output_size_limit = AtomicI64::new(i64::try_from(output_size_limit).unwrap_or(i64::MAX));
        let apply_filter = |caller: &SignedGossipData, filter: &GossipFilter| {
            let caller_wallclock = caller.wallclock();
            if !caller_wallclock_window.contains(&caller_wallclock) {
                trace!("dropping pull request from {} with stale wallclock", caller.pubkey());
                return vec![];
            }
            let limit = output_size_limit.load(Ordering::Relaxed).max(0) as usize;
            let max_wallclock = caller_wallclock.saturating_add(PULL_RESPONSE_WALLCLOCK_JITTER);
            let out: Vec<SignedGossipData> = filter_missing(table, filter)
                .filter(|value| value.wallclock() <= max_wallclock)
                .take(limit)
                .cloned()
                .collect();
            output_size_limit.fetch_sub(out.len() as i64, Ordering::Relaxed);
            out
        };
        requests
            .par_iter()
            .map(|(caller, filter)| apply_filter(caller, filter))
            .collect()
    }

    /// Inserts the values of a pull response. Old values from origins the
    /// table knows nothing about are dropped and remembered as failed.
    pub fn process_pull_response(
        &self,
        table: &mut GossipTable,
        values: Vec<SignedGossipData>,
        now: u64,
    ) -> ProcessPullStats {
        let min_wallclock = now.saturating_sub(self.pull_response_timeout_ms);
        let mut stats = ProcessPullStats::default();
        for value in values {
            if value.wallclock() < min_wallclock
                && table.get_contact_info(&value.pubkey()).is_none()
            {
                table.record_failed_pull_hash(*value.hash(), now);
                stats.timeout += 1;
                continue;
            }
            match table.insert(value, now, GossipRoute::PullResponse) {
                InsertOutcome::Inserted(_) | InsertOutcome::Overwritten(_) => stats.inserted += 1,
                InsertOutcome::Ignored(_) => stats.failed += 1,
            }
        }
        stats
    }

    /// Inserts the requester's own contact info carried by a pull request.
    pub fn process_pull_request(
        &self,
        table: &mut GossipTable,
        caller: SignedGossipData,
        now: u64,
    ) -> InsertOutcome {
        table.insert(caller, now, GossipRoute::PullRequest)
    }
}

/// Values in the filter's slice of hash space that are not in the filter.
pub fn filter_missing<'a>(
    table: &'a GossipTable,
    filter: &'a GossipFilter,
) -> impl Iterator<Item = &'a SignedGossipData> + 'a {
    table
        .get_bitmask_matches(filter.mask, filter.mask_bits)
        .filter_map(|index| table.get_index(index))
        .filter(|record| {
            debug_assert!(filter.test_mask(&record.value_hash));
            !filter.filter_contains(&record.value_hash)
        })
        .map(|record| &record.value)
}

/// Pull requests are only served for callers advertising their own contact
/// info, and never for requests claiming to come from this node.
pub fn is_valid_pull_caller(caller: &SignedGossipData, self_pubkey: &Pubkey) -> bool {
    caller.contact_info().is_some() && caller.pubkey() != *self_pubkey
}
