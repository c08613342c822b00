//! A gossip node: identity, local contact info and the handlers that turn
//! inbound packets and timer ticks into outbound packets.
//!
//! Nothing here sleeps or touches a socket. Every entry point takes the
//! current time and returns the packets to send, so the same code runs under
//! [`GossipService`](crate::gossip_service::GossipService) threads and under
//! simulated time in tests.

use {
    crate::{
        channel::{Packet, PacketBatch},
        config::GossipConfig,
        contact_info::ContactInfo,
        error::{GossipError, Result},
        gossip::Gossip,
        gossip_data::{GossipData, LowestSlot, Vote, VoteIndex, MAX_VOTES},
        gossip_pull::{is_valid_pull_caller, GossipFilter},
        gossip_stats::GossipStats,
        gossip_table::InsertOutcome,
        gossip_value::{GossipKey, SignedGossipData},
        ping_pong::{Ping, PingCache, Pong},
        protocol::{
            split_gossip_messages, Protocol, PULL_RESPONSE_MAX_PAYLOAD_SIZE,
            PUSH_MESSAGE_MAX_PAYLOAD_SIZE,
        },
        prune::PruneData,
    },
    log::{debug, trace, warn},
    parking_lot::{Mutex, RwLock},
    rand::{
        seq::{IndexedRandom, SliceRandom},
        Rng,
    },
    rayon::prelude::*,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::{
        collections::{HashMap, HashSet},
        fmt,
        net::SocketAddr,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

pub struct ClusterInfo {
    keypair: Arc<Keypair>,
    my_contact_info: RwLock<ContactInfo>,
    gossip_addr: SocketAddr,
    pub gossip: Gossip,
    ping_cache: Mutex<PingCache>,
    /// Gossip addresses of bootstrap nodes, pulled from until some peer
    /// becomes eligible.
    entrypoints: RwLock<Vec<SocketAddr>>,
    // Origins each push sender should stop forwarding, flushed as prunes on
    // the next gossip round.
    pending_prunes: Mutex<HashMap<Pubkey, (SocketAddr, HashSet<Pubkey>)>>,
    last_contact_info_refresh: AtomicU64,
    last_pull: AtomicU64,
    last_purge: AtomicU64,
    last_stats_report: AtomicU64,
    config: GossipConfig,
    pub stats: GossipStats,
}

#[derive(Default)]
struct InboundMessages {
    pull_requests: Vec<(SocketAddr, GossipFilter, SignedGossipData)>,
    pull_responses: Vec<(Pubkey, Vec<SignedGossipData>)>,
    pushes: Vec<(SocketAddr, Pubkey, Vec<SignedGossipData>)>,
    prunes: Vec<(Pubkey, PruneData)>,
    pings: Vec<(SocketAddr, Ping)>,
    pongs: Vec<(SocketAddr, Pong)>,
}

// Claims the period if at least `interval` has passed since the last claim.
fn interval_elapsed(last: &AtomicU64, now: u64, interval: u64) -> bool {
    let prev = last.load(Ordering::Relaxed);
    now >= prev.saturating_add(interval)
        && last
            .compare_exchange(prev, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
}

impl fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("id", &self.id())
            .field("gossip_addr", &self.gossip_addr)
            .field("shred_version", &self.my_shred_version())
            .finish_non_exhaustive()
    }
}

impl ClusterInfo {
    pub fn new(contact_info: ContactInfo, keypair: Arc<Keypair>, config: GossipConfig) -> Result<Self> {
        let pubkey = keypair.pubkey();
        if *contact_info.pubkey() != pubkey {
            return Err(GossipError::InvalidSignature(*contact_info.pubkey()));
        }
        let gossip_addr = contact_info
            .gossip()
            .ok_or(GossipError::InvalidGossipAddress(pubkey))?;
        let gossip = Gossip::new(&config);
        let wallclock = contact_info.wallclock();
        let value = SignedGossipData::new(GossipData::ContactInfo(contact_info.clone()), &keypair);
        gossip.insert_local(value, wallclock);
        Ok(Self {
            keypair,
            my_contact_info: RwLock::new(contact_info),
            gossip_addr,
            gossip,
            ping_cache: Mutex::new(PingCache::from_config(&config)),
            entrypoints: RwLock::default(),
            pending_prunes: Mutex::default(),
            last_contact_info_refresh: AtomicU64::new(wallclock),
            last_pull: AtomicU64::default(),
            last_purge: AtomicU64::new(wallclock),
            last_stats_report: AtomicU64::new(wallclock),
            config,
            stats: GossipStats::default(),
        })
    }

    pub fn id(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.gossip_addr
    }

    pub fn my_contact_info(&self) -> ContactInfo {
        self.my_contact_info.read().clone()
    }

    pub fn my_shred_version(&self) -> u16 {
        self.my_contact_info.read().shred_version()
    }

    pub fn set_entrypoints(&self, entrypoints: Vec<SocketAddr>) {
        *self.entrypoints.write() = entrypoints;
    }

    pub fn lookup_contact_info(&self, pubkey: &Pubkey) -> Option<ContactInfo> {
        self.gossip.table.read().get_contact_info(pubkey).cloned()
    }

    /// Contact infos of every other known node.
    pub fn all_peers(&self) -> Vec<ContactInfo> {
        self.gossip.peers(&self.id())
    }

    /// Number of known nodes, this one included.
    pub fn num_nodes(&self) -> usize {
        self.gossip.table.read().num_nodes()
    }

    pub fn is_healthy(&self, node: &(Pubkey, SocketAddr), now: u64) -> bool {
        self.ping_cache.lock().is_healthy(node, now)
    }

    /// Publishes the lowest slot this node still stores.
    pub fn push_lowest_slot(&self, lowest: u64, now: u64) -> InsertOutcome {
        let data = GossipData::LowestSlot(LowestSlot {
            from: self.id(),
            lowest,
            wallclock: now,
        });
        self.push_local_data(data, now)
    }

    /// Publishes a vote, reusing the slot of the oldest vote once all
    /// `MAX_VOTES` slots are taken.
    pub fn push_vote(&self, slot: u64, transaction: Vec<u8>, now: u64) -> InsertOutcome {
        let self_pubkey = self.id();
        let index = {
            let table = self.gossip.table.read();
            let votes: Vec<(VoteIndex, u64)> = table
                .get_records(&self_pubkey)
                .filter_map(|record| match record.value.data() {
                    GossipData::Vote(index, vote) => Some((*index, vote.wallclock)),
                    _ => None,
                })
                .collect();
            if votes.len() < usize::from(MAX_VOTES) {
                (0..MAX_VOTES)
                    .find(|index| votes.iter().all(|(taken, _)| taken != index))
                    .unwrap_or_default()
            } else {
                votes
                    .iter()
                    .min_by_key(|(_, wallclock)| *wallclock)
                    .map(|(index, _)| *index)
                    .unwrap_or_default()
            }
        };
        let vote = Vote {
            from: self_pubkey,
            slot,
            transaction,
            wallclock: now,
        };
        self.push_local_data(GossipData::Vote(index, vote), now)
    }

    fn push_local_data(&self, data: GossipData, now: u64) -> InsertOutcome {
        debug_assert_eq!(data.pubkey(), self.id());
        let value = SignedGossipData::new(data, &self.keypair);
        self.gossip.insert_local(value, now)
    }

    fn refresh_my_contact_info(&self, now: u64) {
        let node = {
            let mut node = self.my_contact_info.write();
            let wallclock = now.max(node.wallclock());
            node.set_wallclock(wallclock);
            node.clone()
        };
        let value = SignedGossipData::new(GossipData::ContactInfo(node), &self.keypair);
        self.gossip.insert_local(value, now);
    }

    fn push_packet(&self, packets: &mut PacketBatch, addr: SocketAddr, message: &Protocol) {
        match message.to_packet() {
            Ok(bytes) => packets.push((addr, bytes)),
            Err(err) => {
                self.stats.values_oversized.inc();
                warn!("dropping {} to {addr}: {err}", message.kind());
            }
        }
    }

    /// Processes one batch of inbound packets, keyed by source address, and
    /// returns the replies.
    pub fn handle_packets(&self, now: u64, packets: PacketBatch) -> PacketBatch {
        self.stats.packets_received.add_relaxed(packets.len() as u64);
        let messages: Vec<(SocketAddr, Protocol)> = packets
            .into_par_iter()
            .filter_map(|(from, bytes): Packet| Some((from, Protocol::from_packet(&bytes, &self.stats)?)))
            .collect();
        let self_pubkey = self.id();
        let mut inbound = InboundMessages::default();
        for (from_addr, message) in messages {
            match message {
                Protocol::PullRequest(filter, caller) => {
                    inbound.pull_requests.push((from_addr, filter, caller))
                }
                Protocol::PullResponse(from, values) => {
                    if from != self_pubkey {
                        inbound.pull_responses.push((from, values));
                    }
                }
                Protocol::PushMessage(from, values) => {
                    if from != self_pubkey {
                        inbound.pushes.push((from_addr, from, values));
                    }
                }
                Protocol::PruneMessage(from, data) => inbound.prunes.push((from, data)),
                Protocol::PingMessage(ping) => inbound.pings.push((from_addr, ping)),
                Protocol::PongMessage(pong) => inbound.pongs.push((from_addr, pong)),
            }
        }
        let mut out = PacketBatch::new();
        self.handle_pings(inbound.pings, &mut out);
        self.handle_pongs(inbound.pongs, now);
        self.handle_prunes(inbound.prunes, now);
        self.handle_pushes(inbound.pushes, now);
        self.handle_pull_responses(inbound.pull_responses, now);
        self.handle_pull_requests(inbound.pull_requests, now, &mut out);
        out
    }

    fn handle_pings(&self, pings: Vec<(SocketAddr, Ping)>, out: &mut PacketBatch) {
        self.stats.pings_received.add_relaxed(pings.len() as u64);
        for (addr, ping) in pings {
            let pong = Pong::new(&ping, &self.keypair);
            self.push_packet(out, addr, &Protocol::PongMessage(pong));
            self.stats.pongs_sent.inc();
        }
    }

    fn handle_pongs(&self, pongs: Vec<(SocketAddr, Pong)>, now: u64) {
        if pongs.is_empty() {
            return;
        }
        self.stats.pongs_received.add_relaxed(pongs.len() as u64);
        let mut ping_cache = self.ping_cache.lock();
        for (addr, pong) in pongs {
            if !ping_cache.add(&pong, addr, now) {
                trace!("unsolicited pong from {} at {addr}", pong.from());
                self.stats.pongs_rejected.inc();
            }
        }
    }

    fn handle_prunes(&self, prunes: Vec<(Pubkey, PruneData)>, now: u64) {
        let self_pubkey = self.id();
        for (from, data) in prunes {
            match self.gossip.process_prune_msg(&self_pubkey, &from, &data, now) {
                Ok(()) => self.stats.prune_messages_received.inc(),
                Err(err) => {
                    debug!("rejected prune from {from}: {err}");
                    self.stats.prune_messages_rejected.inc();
                }
            }
        }
    }

    fn handle_pushes(&self, pushes: Vec<(SocketAddr, Pubkey, Vec<SignedGossipData>)>, now: u64) {
        let self_pubkey = self.id();
        for (addr, from, values) in pushes {
            self.stats.push_messages_received.inc();
            self.stats.push_values_received.add_relaxed(values.len() as u64);
            let (origins, stats) = self.gossip.process_push_message(&self_pubkey, &from, values, now);
            self.stats.push_values_inserted.add_relaxed(stats.inserted as u64);
            self.stats
                .push_values_failed
                .add_relaxed((stats.failed + stats.timeout) as u64);
            if !origins.is_empty() {
                self.pending_prunes
                    .lock()
                    .entry(from)
                    .or_insert_with(|| (addr, HashSet::new()))
                    .1
                    .extend(origins);
            }
        }
    }

    fn handle_pull_responses(&self, responses: Vec<(Pubkey, Vec<SignedGossipData>)>, now: u64) {
        for (from, values) in responses {
            trace!("pull response from {from} with {} values", values.len());
            self.stats
                .pull_response_values_received
                .add_relaxed(values.len() as u64);
            let stats = self.gossip.process_pull_response(values, now);
            self.stats
                .pull_response_values_inserted
                .add_relaxed(stats.inserted as u64);
            self.stats
                .pull_response_values_failed
                .add_relaxed(stats.failed as u64);
            self.stats
                .pull_response_values_timeout
                .add_relaxed(stats.timeout as u64);
        }
    }

    fn handle_pull_requests(
        &self,
        requests: Vec<(SocketAddr, GossipFilter, SignedGossipData)>,
        now: u64,
        out: &mut PacketBatch,
    ) {
        if requests.is_empty() {
            return;
        }
        let self_pubkey = self.id();
        self.stats.pull_requests_received.add_relaxed(requests.len() as u64);
        let requests: Vec<_> = requests
            .into_iter()
            .filter(|(_, _, caller)| is_valid_pull_caller(caller, &self_pubkey))
            .collect();
        self.gossip
            .process_pull_requests(requests.iter().map(|(_, _, caller)| caller.clone()), now);
        // Only callers that answered a ping at the address they sent from
        // are served; the rest get pinged.
        let mut rng = rand::rng();
        let mut pings = Vec::new();
        let (addrs, requests): (Vec<SocketAddr>, Vec<(SignedGossipData, GossipFilter)>) = {
            let mut ping_cache = self.ping_cache.lock();
            requests
                .into_iter()
                .filter(|(addr, _, caller)| {
                    let node = (caller.pubkey(), *addr);
                    let (healthy, ping) = ping_cache.check(&mut rng, &self.keypair, now, node);
                    pings.extend(ping.map(|ping| (*addr, ping)));
                    if !healthy {
                        self.stats.pull_requests_dropped_unhealthy.inc();
                    }
                    healthy
                })
                .map(|(addr, filter, caller)| (addr, (caller, filter)))
                .unzip()
        };
        for (addr, ping) in pings {
            self.push_packet(out, addr, &Protocol::PingMessage(ping));
            self.stats.pings_sent.inc();
        }
        let responses =
            self.gossip
                .generate_pull_responses(&requests, self.config.max_pull_response_values, now);
        for (addr, values) in addrs.into_iter().zip(responses) {
            self.stats
                .pull_response_values_sent
                .add_relaxed(values.len() as u64);
            for chunk in split_gossip_messages(PULL_RESPONSE_MAX_PAYLOAD_SIZE, values) {
                self.push_packet(out, addr, &Protocol::PullResponse(self_pubkey, chunk));
                self.stats.pull_responses_sent.inc();
            }
        }
    }

    /// One tick of the gossip loop: refreshes the local contact info,
    /// rotates the active set, pushes new values and pending prunes, and,
    /// each on its own period, pulls, purges and reports stats.
    pub fn run_gossip_round(&self, now: u64) -> PacketBatch {
        let mut rng = rand::rng();
        let mut out = PacketBatch::new();
        let self_pubkey = self.id();
        let shred_version = self.my_shred_version();
        if interval_elapsed(
            &self.last_contact_info_refresh,
            now,
            self.config.refresh_contact_info_interval_ms,
        ) {
            self.refresh_my_contact_info(now);
        }
        let is_healthy = |node: &(Pubkey, SocketAddr)| self.is_healthy(node, now);
        if self
            .gossip
            .refresh_push_active_set(&mut rng, &self_pubkey, shred_version, is_healthy, now)
        {
            self.stats.active_set_rotations.inc();
        }
        self.new_push_packets(now, &mut out);
        self.new_prune_packets(now, &mut out);
        if interval_elapsed(&self.last_pull, now, self.config.pull_interval_ms) {
            self.new_pull_request_packets(&mut rng, now, &mut out);
        }
        if interval_elapsed(&self.last_purge, now, self.config.purge_interval_ms) {
            let stats = self.gossip.purge(&[self_pubkey], &self.config, now);
            self.stats.table_values_purged.add_relaxed(stats.values as u64);
            self.stats.table_origins_trimmed.add_relaxed(stats.origins as u64);
        }
        if interval_elapsed(&self.last_stats_report, now, self.config.stats_report_interval_ms) {
            self.stats.report();
        }
        out
    }

    fn new_push_packets(&self, now: u64, out: &mut PacketBatch) {
        let self_pubkey = self.id();
        let is_healthy = |node: &(Pubkey, SocketAddr)| self.is_healthy(node, now);
        let (messages, stats) = self.gossip.new_push_messages(&self_pubkey, is_healthy, now);
        self.stats
            .push_values_skipped_timeout
            .add_relaxed(stats.num_skipped as u64);
        for ((_, addr), values) in messages {
            self.stats.push_values_sent.add_relaxed(values.len() as u64);
            for chunk in split_gossip_messages(PUSH_MESSAGE_MAX_PAYLOAD_SIZE, values) {
                self.push_packet(out, addr, &Protocol::PushMessage(self_pubkey, chunk));
                self.stats.push_messages_sent.inc();
            }
        }
    }

    fn new_prune_packets(&self, now: u64, out: &mut PacketBatch) {
        let self_pubkey = self.id();
        let prunes = std::mem::take(&mut *self.pending_prunes.lock());
        for (destination, (addr, origins)) in prunes {
            let origins: Vec<Pubkey> = origins.into_iter().collect();
            for data in PruneData::new_signed(&self.keypair, origins, destination, now) {
                self.push_packet(out, addr, &Protocol::PruneMessage(self_pubkey, data));
                self.stats.prune_messages_sent.inc();
            }
        }
    }

    fn new_pull_request_packets<R: Rng>(&self, rng: &mut R, now: u64, out: &mut PacketBatch) {
        let self_pubkey = self.id();
        let Some(caller) = self
            .gossip
            .table
            .read()
            .get(&GossipKey::ContactInfo(self_pubkey))
            .map(|record| record.value.clone())
        else {
            return;
        };
        let is_healthy = |node: &(Pubkey, SocketAddr)| self.is_healthy(node, now);
        let peers = self
            .gossip
            .eligible_peers(&self_pubkey, self.my_shred_version(), is_healthy);
        let requests = match self.gossip.new_pull_requests(rng, &peers) {
            Ok(requests) => requests,
            Err(GossipError::NoPeers) => {
                let Some(entrypoint) = self.entrypoints.read().choose(rng).copied() else {
                    trace!("no peers to pull from");
                    return;
                };
                let mut filters = self.gossip.build_pull_filters(rng);
                filters.shuffle(rng);
                filters.truncate(self.config.max_pull_requests);
                filters.into_iter().map(|filter| (entrypoint, filter)).collect()
            }
            Err(err) => {
                debug!("failed to build pull requests: {err}");
                return;
            }
        };
        for (addr, filter) in requests {
            self.push_packet(out, addr, &Protocol::PullRequest(filter, caller.clone()));
            self.stats.pull_requests_sent.inc();
        }
    }

    /// One tick of the ping loop: fails peers whose pings went unanswered
    /// and pings every known peer that is due one.
    pub fn run_ping_round(&self, now: u64) -> PacketBatch {
        let shred_version = self.my_shred_version();
        let nodes: Vec<(Pubkey, SocketAddr)> = self
            .all_peers()
            .into_iter()
            .filter(|node| node.shred_version() == shred_version)
            .filter_map(|node| Some((*node.pubkey(), node.gossip()?)))
            .collect();
        let mut rng = rand::rng();
        let pings: Vec<(SocketAddr, Ping)> = {
            let mut ping_cache = self.ping_cache.lock();
            let num_failed = ping_cache.apply_timeouts(now);
            self.stats.ping_timeouts.add_relaxed(num_failed as u64);
            nodes
                .into_iter()
                .filter_map(|node| {
                    let (_, ping) = ping_cache.check(&mut rng, &self.keypair, now, node);
                    Some((node.1, ping?))
                })
                .collect()
        };
        let mut out = PacketBatch::with_capacity(pings.len());
        for (addr, ping) in pings {
            self.push_packet(&mut out, addr, &Protocol::PingMessage(ping));
            self.stats.pings_sent.inc();
        }
        out
    }

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn mock_pong(&self, node: (Pubkey, SocketAddr), now: u64) {
        self.ping_cache.lock().mock_pong(node, now);
    }
}
