//! Push-based dissemination.
//!
//! Newly inserted values are discovered through the table cursor and pushed
//! to the active set. Receivers answer redundant pushes with prunes, which
//! narrows the fanout from each origin into a spanning tree.

use {
    crate::{
        active_set::ActiveSet,
        config::GossipConfig,
        contact_info::ContactInfo,
        gossip_table::{GossipRoute, GossipTable, InsertOutcome},
        gossip_value::SignedGossipData,
        prune::PruneTracker,
    },
    parking_lot::{Mutex, RwLock},
    rand::Rng,
    solana_pubkey::Pubkey,
    std::{
        collections::{HashMap, HashSet},
        net::SocketAddr,
    },
};

/// Values pushed in one round, grouped by destination.
pub type PushMessages = HashMap<(Pubkey, SocketAddr), Vec<SignedGossipData>>;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct NewPushStats {
    /// Values pushed to at least one node.
    pub num_values: usize,
    /// Values skipped because their wallclock was outside the push window.
    pub num_skipped: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessPushStats {
    pub inserted: usize,
    pub failed: usize,
    pub timeout: usize,
}

pub struct GossipPush {
    active_set: RwLock<ActiveSet>,
    // Cursor of the last value already pushed.
    push_cursor: Mutex<u64>,
    push_msg_timeout_ms: u64,
}

impl GossipPush {
    pub fn new(config: &GossipConfig) -> Self {
        Self {
            active_set: RwLock::new(ActiveSet::new(
                config.active_set_size,
                config.active_set_rotation_period_ms,
            )),
            push_cursor: Mutex::default(),
            push_msg_timeout_ms: config.push_msg_timeout_ms,
        }
    }

    pub fn push_cursor(&self) -> u64 {
        *self.push_cursor.lock()
    }

    pub fn active_set(&self) -> &RwLock<ActiveSet> {
        &self.active_set
    }

    /// Resamples the active set from `candidates` if the rotation period has
    /// elapsed. Returns true if the set was rotated.
    pub fn rotate_active_set<R: Rng>(
        &self,
        rng: &mut R,
        now: u64,
        candidates: &[ContactInfo],
    ) -> bool {
        let mut active_set = self.active_set.write();
        if !active_set.needs_rotation(now) {
            return false;
        }
        active_set.rotate(rng, now, candidates);
        true
    }

    /// Collects every value inserted since the last call and assigns it to
    /// the active-set nodes that should receive it.
    pub fn new_push_messages<H>(
        &self,
        self_pubkey: &Pubkey,
        table: &RwLock<GossipTable>,
        prune_tracker: &Mutex<PruneTracker>,
        is_healthy: H,
        now: u64,
    ) -> (PushMessages, NewPushStats)
    where
        H: Fn(&(Pubkey, SocketAddr)) -> bool,
    {
        let wallclock_window = now.saturating_sub(self.push_msg_timeout_ms)
            ..=now.saturating_add(self.push_msg_timeout_ms);
        let mut push_messages = PushMessages::new();
        let mut stats = NewPushStats::default();
        let mut push_cursor = self.push_cursor.lock();
        let table = table.read();
        let active_set = self.active_set.read();
        let prune_tracker = prune_tracker.lock();
        for record in table.get_entries_with_cursor(*push_cursor, None) {
            *push_cursor = record.cursor_on_insertion;
            let value = &record.value;
            if !wallclock_window.contains(&value.wallclock()) {
                stats.num_skipped += 1;
                continue;
            }
            let origin = value.pubkey();
            let nodes = active_set.get_nodes(
                self_pubkey,
                &origin,
                |peer| prune_tracker.contains(peer, &origin, now),
                &is_healthy,
            );
            let mut pushed = false;
            for node in nodes {
                push_messages.entry(*node).or_default().push(value.clone());
                pushed = true;
            }
            if pushed {
                stats.num_values += 1;
            }
        }
        (push_messages, stats)
    }

    /// Inserts pushed values. Returns the origins of values that failed to
    /// insert, excluding the sender's own values; the caller prunes those.
    pub fn process_push_message(
        &self,
        table: &mut GossipTable,
        from: &Pubkey,
        values: Vec<SignedGossipData>,
        now: u64,
    ) -> (HashSet<Pubkey>, ProcessPushStats) {
        let wallclock_window = now.saturating_sub(self.push_msg_timeout_ms)
            ..=now.saturating_add(self.push_msg_timeout_ms);
        let mut origins = HashSet::new();
        let mut stats = ProcessPushStats::default();
        for value in values {
            if !wallclock_window.contains(&value.wallclock()) {
                stats.timeout += 1;
                continue;
            }
            let origin = value.pubkey();
            match table.insert(value, now, GossipRoute::PushMessage) {
                InsertOutcome::Inserted(_) | InsertOutcome::Overwritten(_) => stats.inserted += 1,
                InsertOutcome::Ignored(_) => {
                    stats.failed += 1;
                    // A node is never pruned from pushing its own values.
                    if origin != *from {
                        origins.insert(origin);
                    }
                }
            }
        }
        (origins, stats)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            gossip_data::{GossipData, LowestSlot},
            prune::MAX_PRUNE_PEERS,
        },
        rand::SeedableRng,
        rand_chacha::ChaChaRng,
        solana_keypair::Keypair,
        solana_signer::Signer,
    };

    const NOW: u64 = 1_700_000_000_000;

    fn new_value(keypair: &Keypair, lowest: u64, wallclock: u64) -> SignedGossipData {
        let data = GossipData::LowestSlot(LowestSlot {
            from: keypair.pubkey(),
            lowest,
            wallclock,
        });
        SignedGossipData::new(data, keypair)
    }

    struct Setup {
        push: GossipPush,
        table: RwLock<GossipTable>,
        prune_tracker: Mutex<PruneTracker>,
        peers: Vec<ContactInfo>,
        self_pubkey: Pubkey,
    }

    fn setup(num_peers: usize) -> Setup {
        let mut rng = ChaChaRng::seed_from_u64(0);
        let config = GossipConfig::default();
        let push = GossipPush::new(&config);
        let peers: Vec<ContactInfo> = (0..num_peers)
            .map(|_| ContactInfo::new_rand(&mut rng, None))
            .collect();
        assert!(push.rotate_active_set(&mut rng, NOW, &peers));
        Setup {
            push,
            table: RwLock::new(GossipTable::default()),
            prune_tracker: Mutex::new(PruneTracker::new(config.prune_timeout_ms, MAX_PRUNE_PEERS)),
            peers,
            self_pubkey: solana_pubkey::new_rand(),
        }
    }

    #[test]
    fn test_new_push_messages() {
        let setup = setup(4);
        let origin = Keypair::new();
        let value = new_value(&origin, 1, NOW);
        setup.table.write().insert(value.clone(), NOW, GossipRoute::LocalMessage);
        let (messages, stats) = setup.push.new_push_messages(
            &setup.self_pubkey,
            &setup.table,
            &setup.prune_tracker,
            |_| true,
            NOW,
        );
        assert_eq!(stats, NewPushStats { num_values: 1, num_skipped: 0 });
        assert_eq!(messages.len(), 4);
        assert!(messages.values().all(|values| values == &vec![value.clone()]));
        assert_eq!(setup.push.push_cursor(), 1);
        // Nothing new since.
        let (messages, _) = setup.push.new_push_messages(
            &setup.self_pubkey,
            &setup.table,
            &setup.prune_tracker,
            |_| true,
            NOW,
        );
        assert!(messages.is_empty());
    }

    #[test]
    fn test_push_skips_old_values() {
        let setup = setup(4);
        let origin = Keypair::new();
        let old = new_value(&origin, 1, NOW - GossipConfig::default().push_msg_timeout_ms - 1);
        setup.table.write().insert(old, NOW, GossipRoute::PullResponse);
        let (messages, stats) = setup.push.new_push_messages(
            &setup.self_pubkey,
            &setup.table,
            &setup.prune_tracker,
            |_| true,
            NOW,
        );
        assert!(messages.is_empty());
        assert_eq!(stats.num_skipped, 1);
        assert_eq!(setup.push.push_cursor(), 1);
    }

    #[test]
    fn test_push_excludes_origin_pruned_and_unhealthy() {
        let setup = setup(4);
        let mut origin_node = setup.peers[0].clone();
        origin_node.set_wallclock(NOW);
        let pruned = *setup.peers[1].pubkey();
        let failed = *setup.peers[2].pubkey();
        let data = GossipData::ContactInfo(origin_node.clone());
        let value = SignedGossipData::new_unsigned(data);
        setup.table.write().insert(value, NOW, GossipRoute::PushMessage);
        setup.prune_tracker.lock().prune(pruned, &[*origin_node.pubkey()], NOW);
        let (messages, _) = setup.push.new_push_messages(
            &setup.self_pubkey,
            &setup.table,
            &setup.prune_tracker,
            |(pubkey, _)| *pubkey != failed,
            NOW,
        );
        let destinations: Vec<Pubkey> = messages.keys().map(|(pubkey, _)| *pubkey).collect();
        assert_eq!(destinations, vec![*setup.peers[3].pubkey()]);
    }

    #[test]
    fn test_prune_suppresses_until_expiry() {
        let setup = setup(3);
        let origin = Keypair::new();
        let peer = *setup.peers[0].pubkey();
        setup.prune_tracker.lock().prune(peer, &[origin.pubkey()], NOW);
        let timeout = GossipConfig::default().prune_timeout_ms;
        for (k, now) in [NOW, NOW + timeout - 1, NOW + timeout].into_iter().enumerate() {
            setup.table.write().insert(new_value(&origin, k as u64, now), now, GossipRoute::PushMessage);
            let (messages, _) = setup.push.new_push_messages(
                &setup.self_pubkey,
                &setup.table,
                &setup.prune_tracker,
                |_| true,
                now,
            );
            let reaches_peer = messages.keys().any(|(pubkey, _)| *pubkey == peer);
            assert_eq!(reaches_peer, now >= NOW + timeout);
            assert_eq!(messages.len(), if reaches_peer { 3 } else { 2 });
        }
    }

    #[test]
    fn test_process_push_message() {
        let config = GossipConfig::default();
        let push = GossipPush::new(&config);
        let mut table = GossipTable::default();
        let sender = Keypair::new();
        let other = Keypair::new();
        let newer_other = new_value(&other, 2, NOW);
        let older_other = new_value(&other, 1, NOW - 1);
        let own = new_value(&sender, 1, NOW);
        table.insert(newer_other.clone(), NOW, GossipRoute::LocalMessage);
        table.insert(own.clone(), NOW, GossipRoute::LocalMessage);
        let fresh = new_value(&Keypair::new(), 1, NOW);
        let expired = new_value(&Keypair::new(), 1, NOW - config.push_msg_timeout_ms - 1);
        let (origins, stats) = push.process_push_message(
            &mut table,
            &sender.pubkey(),
            vec![older_other, newer_other, own, fresh, expired],
            NOW,
        );
        assert_eq!(origins, HashSet::from([other.pubkey()]));
        assert_eq!(
            stats,
            ProcessPushStats {
                inserted: 1,
                failed: 3,
                timeout: 1,
            }
        );
        table.check_invariants();
    }
}
