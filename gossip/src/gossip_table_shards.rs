use {
    crate::gossip_pull::GossipFilter,
    indexmap::map::IndexMap,
    itertools::Either,
    solana_hash::Hash,
    std::cmp::Ordering,
};

/// Number of leading hash bits used to bucket table entries.
pub const SHARD_BITS: u32 = 12;

/// Buckets table indices by the leading bits of their value hash so that
/// pull requests can be answered without scanning the whole table.
#[derive(Clone)]
pub struct GossipTableShards {
    // shards[k] includes table indices whose value hash's leading
    // shard_bits bits equal k. Entries map index to the hash as u64.
    shards: Vec<IndexMap<usize, u64>>,
    shard_bits: u32,
}

impl GossipTableShards {
    pub fn new(shard_bits: u32) -> Self {
        Self {
            shards: vec![IndexMap::new(); 1 << shard_bits],
            shard_bits,
        }
    }

    pub fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    /// Returns false if the index was already present.
    pub fn insert(&mut self, index: usize, hash: &Hash) -> bool {
        let hash = GossipFilter::hash_as_u64(hash);
        self.shard_mut(hash).insert(index, hash).is_none()
    }

    /// Returns false if the index was not present.
    pub fn remove(&mut self, index: usize, hash: &Hash) -> bool {
        let hash = GossipFilter::hash_as_u64(hash);
        self.shard_mut(hash).swap_remove(&index).is_some()
    }

    /// Returns table indices whose value hash matches the leading
    /// `mask_bits` bits of `mask`.
    pub fn find_matches(&self, mask: u64, mask_bits: u32) -> impl Iterator<Item = usize> + '_ {
        let ones = (!0u64).checked_shr(mask_bits).unwrap_or(0);
        let mask = mask | ones;
        match self.shard_bits.cmp(&mask_bits) {
            Ordering::Less => {
                let pred = move |(&index, hash): (&usize, &u64)| {
                    if hash | ones == mask {
                        Some(index)
                    } else {
                        None
                    }
                };
                Either::Left(self.shard(mask).iter().filter_map(pred))
            }
            Ordering::Equal => Either::Right(Either::Left(self.shard(mask).keys().copied())),
            Ordering::Greater => {
                // The mask covers a contiguous run of shards ending at the
                // shard addressed by the all-ones suffix.
                let count = 1usize << (self.shard_bits - mask_bits);
                let end = self.shard_index(mask) + 1;
                Either::Right(Either::Right(
                    self.shards[end - count..end]
                        .iter()
                        .flat_map(IndexMap::keys)
                        .copied(),
                ))
            }
        }
    }

    /// Total number of indices across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(IndexMap::is_empty)
    }

    /// Returns the hash recorded for `index`, if the index lives in the
    /// shard addressed by `hash`.
    pub(crate) fn get(&self, index: usize, hash: &Hash) -> Option<u64> {
        let hash = GossipFilter::hash_as_u64(hash);
        self.shard(hash).get(&index).copied()
    }

    #[inline]
    fn shard_index(&self, hash: u64) -> usize {
        hash.checked_shr(64 - self.shard_bits).unwrap_or(0) as usize
    }

    #[inline]
    fn shard(&self, hash: u64) -> &IndexMap<usize, u64> {
        let shard_index = self.shard_index(hash);
        &self.shards[shard_index]
    }

    #[inline]
    fn shard_mut(&mut self, hash: u64) -> &mut IndexMap<usize, u64> {
        let shard_index = self.shard_index(hash);
        &mut self.shards[shard_index]
    }
}
