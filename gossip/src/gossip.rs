//! The gossip core shared by every worker thread: the table plus the push,
//! pull and prune state that reads and mutates it.
//!
//! Locks are taken in a fixed order: push cursor, table, active set, prune
//! tracker. Health checks passed in as closures may lock the ping cache, so
//! the ping cache must never be held while calling into this type.

use {
    crate::{
        active_set::eligible_peers,
        config::GossipConfig,
        contact_info::ContactInfo,
        error::Result,
        gossip_pull::{GossipFilter, GossipPull, ProcessPullStats},
        gossip_push::{GossipPush, NewPushStats, ProcessPushStats, PushMessages},
        gossip_table::{GossipRoute, GossipTable, InsertOutcome},
        gossip_value::SignedGossipData,
        prune::{PruneData, PruneTracker, MAX_PRUNE_PEERS},
    },
    log::{debug, trace},
    parking_lot::{Mutex, RwLock},
    rand::Rng,
    solana_pubkey::Pubkey,
    std::{collections::HashSet, net::SocketAddr},
};

pub struct Gossip {
    pub table: RwLock<GossipTable>,
    pub push: GossipPush,
    pub pull: GossipPull,
    pub prune_tracker: Mutex<PruneTracker>,
}

/// Entries removed by one purge pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub values: usize,
    pub origins: usize,
    pub prune_filters: usize,
}

impl Gossip {
    pub fn new(config: &GossipConfig) -> Self {
        Self {
            table: RwLock::default(),
            push: GossipPush::new(config),
            pull: GossipPull::new(config),
            prune_tracker: Mutex::new(PruneTracker::new(config.prune_timeout_ms, MAX_PRUNE_PEERS)),
        }
    }

    /// Inserts a value originating from this node.
    pub fn insert_local(&self, value: SignedGossipData, now: u64) -> InsertOutcome {
        self.table.write().insert(value, now, GossipRoute::LocalMessage)
    }

    /// Contact infos of every other node in the table.
    pub fn peers(&self, self_pubkey: &Pubkey) -> Vec<ContactInfo> {
        self.table
            .read()
            .get_nodes()
            .filter_map(|record| record.value.contact_info())
            .filter(|node| node.pubkey() != self_pubkey)
            .cloned()
            .collect()
    }

    /// Eligible peers for push and pull traffic.
    pub fn eligible_peers<H>(&self, self_pubkey: &Pubkey, shred_version: u16, is_healthy: H) -> Vec<ContactInfo>
    where
        H: Fn(&(Pubkey, SocketAddr)) -> bool,
    {
        let table = self.table.read();
        let nodes = table.get_nodes().filter_map(|record| record.value.contact_info());
        eligible_peers(self_pubkey, shred_version, nodes, is_healthy)
    }

    /// Resamples the active set once its rotation period has elapsed.
    pub fn refresh_push_active_set<R, H>(
        &self,
        rng: &mut R,
        self_pubkey: &Pubkey,
        shred_version: u16,
        is_healthy: H,
        now: u64,
    ) -> bool
    where
        R: Rng,
        H: Fn(&(Pubkey, SocketAddr)) -> bool,
    {
        if !self.push.active_set().read().needs_rotation(now) {
            return false;
        }
        let peers = self.eligible_peers(self_pubkey, shred_version, is_healthy);
        let rotated = self.push.rotate_active_set(rng, now, &peers);
        if rotated {
            debug!("rotated push active set over {} eligible peers", peers.len());
        }
        rotated
    }

    pub fn new_push_messages<H>(
        &self,
        self_pubkey: &Pubkey,
        is_healthy: H,
        now: u64,
    ) -> (PushMessages, NewPushStats)
    where
        H: Fn(&(Pubkey, SocketAddr)) -> bool,
    {
        self.push
            .new_push_messages(self_pubkey, &self.table, &self.prune_tracker, is_healthy, now)
    }

    /// Inserts pushed values and returns the origins the sender should be
    /// asked to prune.
    pub fn process_push_message(
        &self,
        self_pubkey: &Pubkey,
        from: &Pubkey,
        values: Vec<SignedGossipData>,
        now: u64,
    ) -> (HashSet<Pubkey>, ProcessPushStats) {
        let (mut origins, stats) = {
            let mut table = self.table.write();
            self.push.process_push_message(&mut table, from, values, now)
        };
        origins.remove(self_pubkey);
        (origins, stats)
    }

    /// Applies a prune from `from` if it is addressed to this node and fresh.
    pub fn process_prune_msg(
        &self,
        self_pubkey: &Pubkey,
        from: &Pubkey,
        data: &PruneData,
        now: u64,
    ) -> Result<()> {
        data.check_destination(self_pubkey, now)?;
        trace!("{from} pruned {} origins", data.prunes.len());
        self.prune_tracker.lock().prune(*from, &data.prunes, now);
        Ok(())
    }

    pub fn new_pull_requests<R: Rng>(
        &self,
        rng: &mut R,
        peers: &[ContactInfo],
    ) -> Result<Vec<(SocketAddr, GossipFilter)>> {
        let table = self.table.read();
        self.pull.new_pull_requests(rng, &table, peers)
    }

    pub fn build_pull_filters<R: Rng>(&self, rng: &mut R) -> Vec<GossipFilter> {
        let table = self.table.read();
        self.pull.build_filters(rng, &table)
    }

    /// Inserts the callers' contact infos carried by pull requests.
    pub fn process_pull_requests<I>(&self, callers: I, now: u64)
    where
        I: IntoIterator<Item = SignedGossipData>,
    {
        let mut table = self.table.write();
        for caller in callers {
            self.pull.process_pull_request(&mut table, caller, now);
        }
    }

    pub fn generate_pull_responses(
        &self,
        requests: &[(SignedGossipData, GossipFilter)],
        output_size_limit: usize,
        now: u64,
    ) -> Vec<Vec<SignedGossipData>> {
        let table = self.table.read();
        self.pull
            .generate_pull_responses(&table, requests, output_size_limit, now)
    }

    pub fn process_pull_response(&self, values: Vec<SignedGossipData>, now: u64) -> ProcessPullStats {
        let mut table = self.table.write();
        self.pull.process_pull_response(&mut table, values, now)
    }

    /// Expires old values, exclusion hashes and prune filters, then trims
    /// the table down to `max_unique_origins`. Values from `keep` survive.
    pub fn purge(&self, keep: &[Pubkey], config: &GossipConfig, now: u64) -> PurgeStats {
        let mut stats = PurgeStats::default();
        {
            let mut table = self.table.write();
            stats.values = table.remove_old_labels(now, config.value_timeout_ms, keep);
            table.trim_purged(now.saturating_sub(config.purged_timeout_ms));
            table.trim_failed_pull_hashes(now.saturating_sub(config.pull_response_timeout_ms));
            stats.origins = table.trim(config.max_unique_origins, keep, now);
        }
        stats.prune_filters = self.prune_tracker.lock().purge(now);
        stats
    }
}
