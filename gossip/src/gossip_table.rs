//! The gossip table is the node's replicated view of cluster data.
//!
//! Values are stored in an arena (`IndexMap` keyed by label) and addressed
//! by position from every secondary index: the hash shards used to answer
//! pull requests, the cursor index used by push, per-type indices and the
//! per-origin record sets used for eviction.
//!
//! Removal swaps the last arena entry into the vacated slot, so every index
//! that referenced the former last position is rewritten in the same call.
//! Callers never see a half-updated table.
//!
//! Conflicting values for the same label are resolved by wallclock, and on
//! equal wallclocks by the larger value hash, so every node converges on the
//! same winner.

use {
    crate::{
        contact_info::ContactInfo,
        gossip_data::GossipDataKind,
        gossip_table_shards::{GossipTableShards, SHARD_BITS},
        gossip_value::{GossipKey, SignedGossipData},
    },
    indexmap::{
        map::{Entry, IndexMap},
        set::IndexSet,
    },
    itertools::Either,
    rayon::prelude::*,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        cmp::Ordering,
        collections::{hash_map, BTreeMap, HashMap, VecDeque},
        ops::Bound,
    },
};

/// Cap on remembered overwritten hashes and failed pull hashes.
const MAX_EXCLUDED_HASHES: usize = 1 << 17;

/// Where an inserted value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GossipRoute {
    LocalMessage,
    PullRequest,
    PullResponse,
    PushMessage,
}

/// Why an insert left the table unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The table already holds a newer value for the label.
    Stale,
    /// The table already holds this exact value.
    Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(usize),
    Overwritten(usize),
    Ignored(IgnoreReason),
}

impl InsertOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// A stored value and the local bookkeeping around it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipVersionedData {
    pub value: SignedGossipData,
    pub value_hash: Hash,
    /// Local time the value became current.
    pub timestamp_on_insertion: u64,
    /// Table cursor assigned when the value became current.
    pub cursor_on_insertion: u64,
}

impl GossipVersionedData {
    fn new(value: SignedGossipData, cursor: u64, now: u64) -> Self {
        Self {
            value_hash: *value.hash(),
            value,
            timestamp_on_insertion: now,
            cursor_on_insertion: cursor,
        }
    }
}

pub struct GossipTable {
    table: IndexMap<GossipKey, GossipVersionedData>,
    // Last cursor assigned; the first insert gets 1.
    cursor: u64,
    shards: GossipTableShards,
    // Indices of contact infos.
    nodes: IndexSet<usize>,
    // Cursor to index, over all values.
    entries: BTreeMap<u64, usize>,
    // Cursor to index, per value kind.
    kinds: HashMap<GossipDataKind, BTreeMap<u64, usize>>,
    // Indices of all values from each origin.
    records: HashMap<Pubkey, IndexSet<usize>>,
    // Local time each origin last had a value inserted or overwritten.
    origin_last_updated: HashMap<Pubkey, u64>,
    // Hashes of overwritten, stale and evicted values, with the time they
    // were recorded.
    purged: VecDeque<(Hash, u64)>,
    // Hashes of pull-response values that failed to insert.
    failed_pull_hashes: VecDeque<(Hash, u64)>,
}

impl Default for GossipTable {
    fn default() -> Self {
        Self {
            table: IndexMap::default(),
            cursor: 0,
            shards: GossipTableShards::new(SHARD_BITS),
            nodes: IndexSet::default(),
            entries: BTreeMap::default(),
            kinds: HashMap::default(),
            records: HashMap::default(),
            origin_last_updated: HashMap::default(),
            purged: VecDeque::default(),
            failed_pull_hashes: VecDeque::default(),
        }
    }
}

// Returns true if value should replace the current record for its label.
fn overrides(value: &SignedGossipData, current: &GossipVersionedData) -> bool {
    match value.wallclock().cmp(&current.value.wallclock()) {
        Ordering::Less => false,
        Ordering::Greater => true,
        Ordering::Equal => *value.hash() > current.value_hash,
    }
}

fn push_capped(hashes: &mut VecDeque<(Hash, u64)>, hash: Hash, now: u64) {
    if hashes.len() >= MAX_EXCLUDED_HASHES {
        hashes.pop_front();
    }
    hashes.push_back((hash, now));
}

impl GossipTable {
    pub fn insert(
        &mut self,
        value: SignedGossipData,
        now: u64,
        route: GossipRoute,
    ) -> InsertOutcome {
        let label = value.key();
        let pubkey = value.pubkey();
        let kind = value.kind();
        let value_hash = *value.hash();
        match self.table.entry(label) {
            Entry::Vacant(entry) => {
                let index = entry.index();
                self.cursor += 1;
                let cursor = self.cursor;
                self.shards.insert(index, &value_hash);
                self.entries.insert(cursor, index);
                self.kinds.entry(kind).or_default().insert(cursor, index);
                if kind == GossipDataKind::ContactInfo {
                    self.nodes.insert(index);
                }
                self.records.entry(pubkey).or_default().insert(index);
                Self::touch_origin(&mut self.origin_last_updated, pubkey, now);
                entry.insert(GossipVersionedData::new(value, cursor, now));
                InsertOutcome::Inserted(index)
            }
            Entry::Occupied(mut entry) if overrides(&value, entry.get()) => {
                let index = entry.index();
                self.cursor += 1;
                let cursor = self.cursor;
                let current = entry.get();
                self.shards.remove(index, &current.value_hash);
                self.shards.insert(index, &value_hash);
                self.entries.remove(&current.cursor_on_insertion);
                self.entries.insert(cursor, index);
                if let Some(entries) = self.kinds.get_mut(&kind) {
                    entries.remove(&current.cursor_on_insertion);
                    entries.insert(cursor, index);
                }
                push_capped(&mut self.purged, current.value_hash, now);
                Self::touch_origin(&mut self.origin_last_updated, pubkey, now);
                *entry.get_mut() = GossipVersionedData::new(value, cursor, now);
                InsertOutcome::Overwritten(index)
            }
            Entry::Occupied(entry) => {
                let reason = if entry.get().value_hash == value_hash {
                    IgnoreReason::Duplicate
                } else {
                    // Remember the loser so pull filters do not ask for it.
                    push_capped(&mut self.purged, value_hash, now);
                    IgnoreReason::Stale
                };
                if route == GossipRoute::PullResponse {
                    push_capped(&mut self.failed_pull_hashes, value_hash, now);
                }
                InsertOutcome::Ignored(reason)
            }
        }
    }

    fn touch_origin(origin_last_updated: &mut HashMap<Pubkey, u64>, pubkey: Pubkey, now: u64) {
        let timestamp = origin_last_updated.entry(pubkey).or_default();
        *timestamp = (*timestamp).max(now);
    }

    /// Records the hash of a pull-response value that was dropped before
    /// reaching [`insert`](Self::insert).
    pub fn record_failed_pull_hash(&mut self, hash: Hash, now: u64) {
        push_capped(&mut self.failed_pull_hashes, hash, now);
    }

    pub fn get(&self, key: &GossipKey) -> Option<&GossipVersionedData> {
        self.table.get(key)
    }

    pub fn get_index(&self, index: usize) -> Option<&GossipVersionedData> {
        self.table.get_index(index).map(|(_, record)| record)
    }

    pub fn get_contact_info(&self, pubkey: &Pubkey) -> Option<&ContactInfo> {
        self.table
            .get(&GossipKey::ContactInfo(*pubkey))
            .and_then(|record| record.value.contact_info())
    }

    /// Returns all contact infos in the table.
    pub fn get_nodes(&self) -> impl Iterator<Item = &GossipVersionedData> + '_ {
        self.nodes.iter().map(move |index| &self.table[*index])
    }

    /// Returns all values from `pubkey`.
    pub fn get_records<'a>(
        &'a self,
        pubkey: &Pubkey,
    ) -> impl Iterator<Item = &'a GossipVersionedData> + use<'a> {
        self.records
            .get(pubkey)
            .into_iter()
            .flat_map(IndexSet::iter)
            .map(move |index| &self.table[*index])
    }

    /// Returns table indices of values whose hash matches `mask` on its
    /// leading `mask_bits` bits.
    pub fn get_bitmask_matches(&self, mask: u64, mask_bits: u32) -> impl Iterator<Item = usize> + '_ {
        self.shards.find_matches(mask, mask_bits)
    }

    /// Returns values with `cursor_on_insertion > min_cursor`, in cursor
    /// order, optionally restricted to one kind.
    pub fn get_entries_with_cursor(
        &self,
        min_cursor: u64,
        kind: Option<GossipDataKind>,
    ) -> impl Iterator<Item = &GossipVersionedData> + '_ {
        let range = (Bound::Excluded(min_cursor), Bound::Unbounded);
        let entries = match kind {
            None => Either::Left(self.entries.range(range)),
            Some(kind) => Either::Right(
                self.kinds
                    .get(&kind)
                    .into_iter()
                    .flat_map(move |entries| entries.range(range)),
            ),
        };
        entries.map(move |(_, index)| &self.table[*index])
    }

    pub fn values(&self) -> impl Iterator<Item = &GossipVersionedData> + '_ {
        self.table.values()
    }

    pub fn purged(&self) -> impl Iterator<Item = Hash> + '_ {
        self.purged.iter().map(|(hash, _)| *hash)
    }

    pub fn failed_pull_hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        self.failed_pull_hashes.iter().map(|(hash, _)| *hash)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Last cursor assigned.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_origins(&self) -> usize {
        self.records.len()
    }

    pub fn num_purged(&self) -> usize {
        self.purged.len()
    }

    pub fn num_failed_pull_hashes(&self) -> usize {
        self.failed_pull_hashes.len()
    }

    pub fn origin_last_updated(&self, pubkey: &Pubkey) -> Option<u64> {
        self.origin_last_updated.get(pubkey).copied()
    }

    /// Drops purged hashes recorded before `min_timestamp`.
    pub fn trim_purged(&mut self, min_timestamp: u64) {
        while matches!(self.purged.front(), Some((_, timestamp)) if *timestamp < min_timestamp) {
            self.purged.pop_front();
        }
    }

    /// Drops failed pull hashes recorded before `min_timestamp`.
    pub fn trim_failed_pull_hashes(&mut self, min_timestamp: u64) {
        while matches!(
            self.failed_pull_hashes.front(),
            Some((_, timestamp)) if *timestamp < min_timestamp
        ) {
            self.failed_pull_hashes.pop_front();
        }
    }

    /// Removes every value inserted more than `max_age` before `now`, except
    /// values from origins in `keep`. Returns the number removed.
    pub fn remove_old_labels(&mut self, now: u64, max_age: u64, keep: &[Pubkey]) -> usize {
        let min_timestamp = now.saturating_sub(max_age);
        let old_labels: Vec<GossipKey> = self
            .table
            .par_iter()
            .filter(|(key, record)| {
                record.timestamp_on_insertion < min_timestamp && !keep.contains(&key.pubkey())
            })
            .map(|(key, _)| *key)
            .collect();
        for key in &old_labels {
            self.remove(key, now);
        }
        old_labels.len()
    }

    /// Evicts every value of the least recently updated origins until at
    /// most `max_unique_origins` remain. Origins in `keep` are never evicted.
    /// Returns the number of origins evicted.
    pub fn trim(&mut self, max_unique_origins: usize, keep: &[Pubkey], now: u64) -> usize {
        let num_origins = self.records.len();
        if num_origins <= max_unique_origins {
            return 0;
        }
        let mut origins: Vec<(u64, Pubkey)> = self
            .origin_last_updated
            .iter()
            .filter(|(pubkey, _)| !keep.contains(*pubkey))
            .map(|(pubkey, timestamp)| (*timestamp, *pubkey))
            .collect();
        origins.sort_unstable();
        let evicted: Vec<Pubkey> = origins
            .into_iter()
            .take(num_origins - max_unique_origins)
            .map(|(_, pubkey)| pubkey)
            .collect();
        for pubkey in &evicted {
            let keys: Vec<GossipKey> = self.get_records(pubkey).map(|record| record.value.key()).collect();
            for key in &keys {
                self.remove(key, now);
            }
        }
        evicted.len()
    }

    /// Removes the value at `key`, moving the last arena entry into its slot
    /// and rewriting every index that pointed at the moved entry.
    fn remove(&mut self, key: &GossipKey, now: u64) {
        let Some((index, _, record)) = self.table.swap_remove_full(key) else {
            return;
        };
        let pubkey = record.value.pubkey();
        let kind = record.value.kind();
        let cursor = record.cursor_on_insertion;
        self.shards.remove(index, &record.value_hash);
        self.entries.remove(&cursor);
        if let Some(entries) = self.kinds.get_mut(&kind) {
            entries.remove(&cursor);
        }
        if kind == GossipDataKind::ContactInfo {
            self.nodes.swap_remove(&index);
        }
        if let hash_map::Entry::Occupied(mut entry) = self.records.entry(pubkey) {
            entry.get_mut().swap_remove(&index);
            if entry.get().is_empty() {
                entry.remove();
                self.origin_last_updated.remove(&pubkey);
            }
        }
        push_capped(&mut self.purged, record.value_hash, now);
        // The former last entry now lives at index.
        let size = self.table.len();
        if index < size {
            let moved = &self.table[index];
            let cursor = moved.cursor_on_insertion;
            let kind = moved.value.kind();
            self.shards.remove(size, &moved.value_hash);
            self.shards.insert(index, &moved.value_hash);
            self.entries.insert(cursor, index);
            if let Some(entries) = self.kinds.get_mut(&kind) {
                entries.insert(cursor, index);
            }
            if kind == GossipDataKind::ContactInfo {
                self.nodes.swap_remove(&size);
                self.nodes.insert(index);
            }
            if let Some(indices) = self.records.get_mut(&moved.value.pubkey()) {
                indices.swap_remove(&size);
                indices.insert(index);
            }
        }
    }

    /// Asserts that every secondary index agrees with the arena.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn check_invariants(&self) {
        let size = self.table.len();
        assert_eq!(self.shards.len(), size);
        assert_eq!(self.entries.len(), size);
        assert_eq!(self.kinds.values().map(BTreeMap::len).sum::<usize>(), size);
        assert_eq!(self.records.values().map(IndexSet::len).sum::<usize>(), size);
        assert_eq!(self.records.len(), self.origin_last_updated.len());
        let mut num_nodes = 0;
        for (index, (key, record)) in self.table.iter().enumerate() {
            let cursor = record.cursor_on_insertion;
            assert_eq!(*key, record.value.key());
            assert_eq!(record.value_hash, *record.value.hash());
            assert!(cursor <= self.cursor);
            assert!(self.shards.get(index, &record.value_hash).is_some());
            assert_eq!(self.entries.get(&cursor), Some(&index));
            assert_eq!(self.kinds[&key.kind()].get(&cursor), Some(&index));
            assert!(self.records[&key.pubkey()].contains(&index));
            assert!(self.origin_last_updated.contains_key(&key.pubkey()));
            if key.kind() == GossipDataKind::ContactInfo {
                assert!(self.nodes.contains(&index));
                num_nodes += 1;
            }
        }
        assert_eq!(self.nodes.len(), num_nodes);
        assert!(self.nodes.iter().all(|index| *index < size));
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            gossip_data::{GossipData, LowestSlot, Vote},
            gossip_pull::GossipFilter,
        },
        assert_matches::assert_matches,
        rand::{seq::IndexedRandom, Rng, SeedableRng},
        rand_chacha::ChaChaRng,
        solana_keypair::Keypair,
        solana_signer::Signer,
        std::collections::HashSet,
    };

    fn new_lowest_slot(keypair: &Keypair, lowest: u64, wallclock: u64) -> SignedGossipData {
        let data = GossipData::LowestSlot(LowestSlot {
            from: keypair.pubkey(),
            lowest,
            wallclock,
        });
        SignedGossipData::new(data, keypair)
    }

    fn new_vote(keypair: &Keypair, index: u8, slot: u64, wallclock: u64) -> SignedGossipData {
        let data = GossipData::Vote(
            index,
            Vote {
                from: keypair.pubkey(),
                slot,
                transaction: vec![7; 16],
                wallclock,
            },
        );
        SignedGossipData::new(data, keypair)
    }

    fn new_node(keypair: &Keypair, wallclock: u64) -> SignedGossipData {
        let node = ContactInfo::new_localhost(&keypair.pubkey(), 8000, wallclock);
        SignedGossipData::new(GossipData::ContactInfo(node), keypair)
    }

    #[test]
    fn test_insert() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        let value = new_lowest_slot(&keypair, 1, 10);
        assert_eq!(
            table.insert(value.clone(), 0, GossipRoute::LocalMessage),
            InsertOutcome::Inserted(0)
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.cursor(), 1);
        let record = table.get(&value.key()).unwrap();
        assert_eq!(record.value, value);
        assert_eq!(record.cursor_on_insertion, 1);
        assert_eq!(record.timestamp_on_insertion, 0);
        assert_eq!(table.origin_last_updated(&keypair.pubkey()), Some(0));
        table.check_invariants();
    }

    #[test]
    fn test_update_newer() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        let original = new_lowest_slot(&keypair, 1, 0);
        let newer = new_lowest_slot(&keypair, 2, 1);
        assert_eq!(table.insert(original.clone(), 0, GossipRoute::LocalMessage), InsertOutcome::Inserted(0));
        assert_eq!(table.insert(newer.clone(), 5, GossipRoute::PushMessage), InsertOutcome::Overwritten(0));
        let record = table.get(&newer.key()).unwrap();
        assert_eq!(record.value, newer);
        assert_eq!(record.cursor_on_insertion, 2);
        assert_eq!(record.timestamp_on_insertion, 5);
        assert_eq!(table.purged().collect::<Vec<_>>(), vec![*original.hash()]);
        assert_eq!(table.origin_last_updated(&keypair.pubkey()), Some(5));
        table.check_invariants();
    }

    #[test]
    fn test_update_stale_and_duplicate() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        let current = new_lowest_slot(&keypair, 2, 10);
        let stale = new_lowest_slot(&keypair, 1, 9);
        assert!(table.insert(current.clone(), 0, GossipRoute::LocalMessage).is_ok());
        assert_eq!(
            table.insert(stale.clone(), 1, GossipRoute::PushMessage),
            InsertOutcome::Ignored(IgnoreReason::Stale)
        );
        assert_eq!(
            table.insert(current.clone(), 1, GossipRoute::PushMessage),
            InsertOutcome::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(table.get(&current.key()).unwrap().value, current);
        assert_eq!(table.cursor(), 1);
        // Push failures are not pull failures.
        assert_eq!(table.num_failed_pull_hashes(), 0);
        assert_eq!(table.purged().collect::<Vec<_>>(), vec![*stale.hash()]);
        table.check_invariants();
    }

    #[test]
    fn test_equal_wallclock_larger_hash_wins() {
        let keypair = Keypair::new();
        let a = new_lowest_slot(&keypair, 1, 7);
        let b = new_lowest_slot(&keypair, 2, 7);
        let (small, large) = if a.hash() < b.hash() { (a, b) } else { (b, a) };
        // Insertion order must not matter.
        for values in [[small.clone(), large.clone()], [large.clone(), small.clone()]] {
            let mut table = GossipTable::default();
            for value in values {
                table.insert(value, 0, GossipRoute::PushMessage);
            }
            assert_eq!(table.get(&large.key()).unwrap().value, large);
            table.check_invariants();
        }
    }

    #[test]
    fn test_failed_pull_hashes() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        let current = new_lowest_slot(&keypair, 2, 10);
        let stale = new_lowest_slot(&keypair, 1, 9);
        table.insert(current.clone(), 0, GossipRoute::LocalMessage);
        assert_matches!(
            table.insert(stale.clone(), 1, GossipRoute::PullResponse),
            InsertOutcome::Ignored(IgnoreReason::Stale)
        );
        assert_matches!(
            table.insert(current.clone(), 2, GossipRoute::PullResponse),
            InsertOutcome::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(
            table.failed_pull_hashes().collect::<Vec<_>>(),
            vec![*stale.hash(), *current.hash()]
        );
        table.trim_failed_pull_hashes(2);
        assert_eq!(table.failed_pull_hashes().collect::<Vec<_>>(), vec![*current.hash()]);
        table.trim_failed_pull_hashes(3);
        assert_eq!(table.num_failed_pull_hashes(), 0);
    }

    #[test]
    fn test_trim_purged() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        for wallclock in 0..10 {
            table.insert(new_lowest_slot(&keypair, wallclock, wallclock), wallclock, GossipRoute::PushMessage);
        }
        // Nine overwrites, recorded at times 1..=9.
        assert_eq!(table.num_purged(), 9);
        table.trim_purged(5);
        assert_eq!(table.num_purged(), 5);
        table.trim_purged(100);
        assert_eq!(table.num_purged(), 0);
    }

    #[test]
    fn test_typed_reads() {
        let mut table = GossipTable::default();
        let keypair = Keypair::new();
        table.insert(new_node(&keypair, 0), 0, GossipRoute::LocalMessage);
        table.insert(new_vote(&keypair, 0, 1, 0), 0, GossipRoute::LocalMessage);
        table.insert(new_vote(&keypair, 1, 2, 0), 0, GossipRoute::LocalMessage);
        table.insert(new_lowest_slot(&keypair, 0, 0), 0, GossipRoute::LocalMessage);
        assert_eq!(table.num_nodes(), 1);
        assert_eq!(table.num_origins(), 1);
        assert_eq!(table.get_records(&keypair.pubkey()).count(), 4);
        assert!(table.get_contact_info(&keypair.pubkey()).is_some());
        assert_eq!(table.get_entries_with_cursor(0, Some(GossipDataKind::Vote)).count(), 2);
        assert_eq!(table.get_entries_with_cursor(2, Some(GossipDataKind::Vote)).count(), 1);
        assert_eq!(table.get_entries_with_cursor(0, Some(GossipDataKind::EpochSlots)).count(), 0);
        assert_eq!(table.get_entries_with_cursor(3, None).count(), 1);
    }

    // Three records, remove the middle one, the last moves into its slot.
    #[test]
    fn test_swap_remove_middle() {
        let mut table = GossipTable::default();
        let keypairs: Vec<Keypair> = (0..3).map(|_| Keypair::new()).collect();
        // The middle record is inserted earliest in local time.
        table.insert(new_node(&keypairs[0], 0), 10, GossipRoute::LocalMessage);
        table.insert(new_node(&keypairs[1], 0), 0, GossipRoute::LocalMessage);
        table.insert(new_node(&keypairs[2], 0), 10, GossipRoute::LocalMessage);
        let last_key = GossipKey::ContactInfo(keypairs[2].pubkey());
        assert_eq!(table.table.get_index_of(&last_key), Some(2));
        table.check_invariants();

        assert_eq!(table.remove_old_labels(15, 10, &[]), 1);
        assert_eq!(table.len(), 2);
        assert!(table.get_contact_info(&keypairs[1].pubkey()).is_none());
        // The former last record now lives at index 1 everywhere.
        assert_eq!(table.table.get_index_of(&last_key), Some(1));
        let record = table.get(&last_key).unwrap();
        assert_eq!(table.shards.get(1, &record.value_hash), Some(GossipFilter::hash_as_u64(&record.value_hash)));
        assert_eq!(table.shards.get(2, &record.value_hash), None);
        assert_eq!(table.entries[&record.cursor_on_insertion], 1);
        assert_eq!(table.kinds[&GossipDataKind::ContactInfo][&record.cursor_on_insertion], 1);
        assert!(table.nodes.contains(&1));
        assert!(!table.nodes.contains(&2));
        assert_eq!(table.records[&keypairs[2].pubkey()].iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(!table.records.contains_key(&keypairs[1].pubkey()));
        assert_eq!(
            table.get_bitmask_matches(0, 0).collect::<HashSet<_>>(),
            HashSet::from([0, 1])
        );
        table.check_invariants();
    }

    #[test]
    fn test_remove_old_labels_keeps_self() {
        let mut table = GossipTable::default();
        let this = Keypair::new();
        let other = Keypair::new();
        table.insert(new_node(&this, 0), 0, GossipRoute::LocalMessage);
        table.insert(new_node(&other, 0), 0, GossipRoute::PushMessage);
        table.insert(new_vote(&other, 3, 1, 0), 50, GossipRoute::PushMessage);
        assert_eq!(table.remove_old_labels(100, 60, &[this.pubkey()]), 1);
        assert!(table.get_contact_info(&this.pubkey()).is_some());
        assert!(table.get_contact_info(&other.pubkey()).is_none());
        assert_eq!(table.get_records(&other.pubkey()).count(), 1);
        table.check_invariants();
    }

    #[test]
    fn test_trim_oldest_origins() {
        let mut table = GossipTable::default();
        let this = Keypair::new();
        table.insert(new_node(&this, 0), 0, GossipRoute::LocalMessage);
        let keypairs: Vec<Keypair> = (0..10).map(|_| Keypair::new()).collect();
        for (k, keypair) in keypairs.iter().enumerate() {
            let now = k as u64 + 1;
            table.insert(new_node(keypair, 0), now, GossipRoute::PushMessage);
            table.insert(new_vote(keypair, 0, now, 0), now, GossipRoute::PushMessage);
        }
        // The oldest origin refreshes a value and survives.
        table.insert(new_vote(&keypairs[0], 1, 5, 0), 100, GossipRoute::PushMessage);
        assert_eq!(table.num_origins(), 11);
        assert_eq!(table.trim(5, &[this.pubkey()], 200), 6);
        assert_eq!(table.num_origins(), 5);
        assert!(table.get_contact_info(&this.pubkey()).is_some());
        assert!(table.get_contact_info(&keypairs[0].pubkey()).is_some());
        for keypair in &keypairs[1..7] {
            assert_eq!(table.get_records(&keypair.pubkey()).count(), 0);
        }
        for keypair in &keypairs[7..] {
            assert_eq!(table.get_records(&keypair.pubkey()).count(), 2);
        }
        assert_eq!(table.trim(5, &[this.pubkey()], 200), 0);
        table.check_invariants();
    }

    #[test]
    fn test_get_entries_with_cursor() {
        let mut rng = ChaChaRng::seed_from_u64(17);
        let keypairs: Vec<Keypair> = (0..8).map(|_| Keypair::new()).collect();
        let mut table = GossipTable::default();
        let mut cursors = Vec::new();
        for now in 0..500 {
            let keypair = keypairs.choose(&mut rng).unwrap();
            let value = SignedGossipData::new_rand(&mut rng, Some(keypair));
            if table.insert(value, now, GossipRoute::PushMessage).is_ok() {
                cursors.push(table.cursor());
            }
        }
        // Strictly increasing.
        assert!(cursors.windows(2).all(|w| w[0] < w[1]));
        for _ in 0..32 {
            let min_cursor = rng.random_range(0..=table.cursor());
            let entries: Vec<u64> = table
                .get_entries_with_cursor(min_cursor, None)
                .map(|record| record.cursor_on_insertion)
                .collect();
            let mut expected: Vec<u64> = table
                .values()
                .map(|record| record.cursor_on_insertion)
                .filter(|cursor| *cursor > min_cursor)
                .collect();
            expected.sort_unstable();
            assert_eq!(entries, expected);
        }
    }

    #[test]
    fn test_label_uniqueness() {
        let mut rng = ChaChaRng::seed_from_u64(23);
        let keypairs: Vec<Keypair> = (0..4).map(|_| Keypair::new()).collect();
        let mut table = GossipTable::default();
        let mut inserted: HashMap<GossipKey, Vec<SignedGossipData>> = HashMap::new();
        for now in 0..1_000 {
            let keypair = keypairs.choose(&mut rng).unwrap();
            let value = new_vote(
                keypair,
                rng.random_range(0..4),
                rng.random_range(0..8),
                rng.random_range(0..16),
            );
            inserted.entry(value.key()).or_default().push(value.clone());
            table.insert(value, now, GossipRoute::PushMessage);
        }
        assert_eq!(table.len(), inserted.len());
        for (key, values) in &inserted {
            let winner = values
                .iter()
                .max_by(|a, b| a.wallclock().cmp(&b.wallclock()).then(a.hash().cmp(b.hash())))
                .unwrap();
            assert_eq!(&table.get(key).unwrap().value, winner);
        }
        table.check_invariants();
    }

    #[test]
    fn test_index_consistency_under_eviction() {
        let mut rng = ChaChaRng::seed_from_u64(41);
        let keypairs: Vec<Keypair> = (0..32).map(|_| Keypair::new()).collect();
        let mut table = GossipTable::default();
        for now in 0..2_000u64 {
            let keypair = keypairs.choose(&mut rng).unwrap();
            let value = SignedGossipData::new_rand(&mut rng, Some(keypair));
            table.insert(value, now, GossipRoute::PushMessage);
            match rng.random_range(0..50) {
                0 => {
                    table.trim(rng.random_range(1..32), &[], now);
                }
                1 => {
                    table.remove_old_labels(now, rng.random_range(0..400), &[]);
                }
                _ => continue,
            }
            table.check_invariants();
            for mask_bits in [0, 4, SHARD_BITS, 16] {
                let mask = rng.random();
                let ones = (!0u64).checked_shr(mask_bits).unwrap_or(0);
                let matches: HashSet<usize> = table.get_bitmask_matches(mask, mask_bits).collect();
                let expected: HashSet<usize> = table
                    .values()
                    .enumerate()
                    .filter(|(_, record)| {
                        GossipFilter::hash_as_u64(&record.value_hash) | ones == mask | ones
                    })
                    .map(|(index, _)| index)
                    .collect();
                assert_eq!(matches, expected);
            }
        }
        table.check_invariants();
    }
}
