//! Ping/pong liveness checks.
//!
//! A peer becomes eligible for push and pull traffic only after it answers a
//! ping sent to its advertised gossip address with a pong signed by the same
//! identity. Each (pubkey, address) pair moves through [`PingState`]:
//!
//! ```text
//! Unchecked --ping--> Pending --pong--> Healthy
//!                        |                 |
//!                     timeout         ttl expires
//!                        v                 v
//!                     Failed --ping--> Pending
//! ```
//!
//! Healthy peers are re-pinged once their pong is older than an eighth of the
//! ttl so they normally never lapse. No peer is pinged more than once per
//! rate-limit period.

use {
    crate::config::GossipConfig,
    lru::LruCache,
    rand::Rng,
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    solana_signature::Signature,
    solana_signer::Signer,
    std::net::SocketAddr,
};

const PING_PONG_HASH_PREFIX: &[u8] = b"SOLANA_PING_PONG";
const PING_TOKEN_SIZE: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    from: Pubkey,
    token: [u8; PING_TOKEN_SIZE],
    signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    from: Pubkey,
    hash: Hash,
    signature: Signature,
}

impl Ping {
    pub fn new(token: [u8; PING_TOKEN_SIZE], keypair: &Keypair) -> Self {
        Self {
            from: keypair.pubkey(),
            token,
            signature: keypair.sign_message(&token),
        }
    }

    pub fn new_rand<R: Rng>(rng: &mut R, keypair: &Keypair) -> Self {
        Self::new(rng.random(), keypair)
    }

    pub fn from(&self) -> &Pubkey {
        &self.from
    }

    pub fn verify(&self) -> bool {
        self.signature.verify(self.from.as_ref(), &self.token)
    }
}

impl Sanitize for Ping {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        Ok(())
    }
}

impl Pong {
    pub fn new(ping: &Ping, keypair: &Keypair) -> Self {
        let hash = hash_ping_token(&ping.token);
        Self {
            from: keypair.pubkey(),
            hash,
            signature: keypair.sign_message(hash.as_ref()),
        }
    }

    pub fn from(&self) -> &Pubkey {
        &self.from
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn verify(&self) -> bool {
        self.signature.verify(self.from.as_ref(), self.hash.as_ref())
    }
}

impl Sanitize for Pong {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        Ok(())
    }
}

/// The hash a pong must carry to answer a ping with `token`.
pub fn hash_ping_token(token: &[u8; PING_TOKEN_SIZE]) -> Hash {
    solana_sha256_hasher::hashv(&[PING_PONG_HASH_PREFIX, token])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PingState {
    /// Never pinged.
    Unchecked,
    /// Pinged and awaiting a pong.
    Pending,
    /// Answered a ping within the ttl.
    Healthy,
    /// Did not answer the last ping in time.
    Failed,
}

#[derive(Clone, Debug)]
struct PingRecord {
    state: PingState,
    last_ping_sent: Option<u64>,
    last_pong_received: Option<u64>,
}

impl Default for PingRecord {
    fn default() -> Self {
        Self {
            state: PingState::Unchecked,
            last_ping_sent: None,
            last_pong_received: None,
        }
    }
}

pub struct PingCache {
    pong_ttl_ms: u64,
    rate_limit_ms: u64,
    ping_timeout_ms: u64,
    records: LruCache<(Pubkey, SocketAddr), PingRecord>,
    // Expected pong hash to the node the ping was sent to.
    pending: LruCache<Hash, (Pubkey, SocketAddr)>,
}

impl PingCache {
    pub fn new(pong_ttl_ms: u64, rate_limit_ms: u64, ping_timeout_ms: u64, cap: usize) -> Self {
        // A ping timeout at or beyond the rate limit would leave nodes
        // pending across ping attempts.
        debug_assert!(ping_timeout_ms <= rate_limit_ms);
        Self {
            pong_ttl_ms,
            rate_limit_ms,
            ping_timeout_ms,
            records: LruCache::new(cap),
            pending: LruCache::new(cap),
        }
    }

    pub fn from_config(config: &GossipConfig) -> Self {
        Self::new(
            config.pong_ttl_ms,
            config.ping_rate_limit_ms,
            config.ping_timeout_ms,
            config.ping_cache_capacity,
        )
    }

    // State of the record once the passage of time up to `now` is applied.
    fn effective_state(&self, record: &PingRecord, now: u64) -> PingState {
        match record.state {
            PingState::Pending
                if record
                    .last_ping_sent
                    .is_some_and(|sent| now >= sent.saturating_add(self.ping_timeout_ms)) =>
            {
                PingState::Failed
            }
            PingState::Healthy if !self.pong_is_fresh(record, now, self.pong_ttl_ms) => {
                PingState::Pending
            }
            state => state,
        }
    }

    fn pong_is_fresh(&self, record: &PingRecord, now: u64, max_age: u64) -> bool {
        record
            .last_pong_received
            .is_some_and(|received| now < received.saturating_add(max_age))
    }

    fn can_ping(&self, record: &PingRecord, now: u64) -> bool {
        record
            .last_ping_sent
            .is_none_or(|sent| now >= sent.saturating_add(self.rate_limit_ms))
    }

    /// Returns the node's current state without touching LRU order.
    pub fn state(&self, node: &(Pubkey, SocketAddr), now: u64) -> PingState {
        self.records
            .peek(node)
            .map(|record| self.effective_state(record, now))
            .unwrap_or(PingState::Unchecked)
    }

    pub fn is_healthy(&self, node: &(Pubkey, SocketAddr), now: u64) -> bool {
        self.state(node, now) == PingState::Healthy
    }

    /// Checks whether `node` is healthy and returns a ping to send it if one
    /// is due and the rate limit allows.
    pub fn check<R: Rng>(
        &mut self,
        rng: &mut R,
        keypair: &Keypair,
        now: u64,
        node: (Pubkey, SocketAddr),
    ) -> (bool, Option<Ping>) {
        let mut record = self.records.pop(&node).unwrap_or_default();
        record.state = self.effective_state(&record, now);
        let healthy = record.state == PingState::Healthy;
        let needs_ping = match record.state {
            PingState::Unchecked | PingState::Failed => true,
            // Pending without a live ping: a lapsed healthy node.
            PingState::Pending => record
                .last_ping_sent
                .is_none_or(|sent| now >= sent.saturating_add(self.ping_timeout_ms)),
            PingState::Healthy => !self.pong_is_fresh(&record, now, self.pong_ttl_ms / 8),
        };
        let ping = if needs_ping && self.can_ping(&record, now) {
            let ping = Ping::new_rand(rng, keypair);
            self.pending.put(hash_ping_token(&ping.token), node);
            record.last_ping_sent = Some(now);
            if !healthy {
                record.state = PingState::Pending;
            }
            Some(ping)
        } else {
            None
        };
        self.records.put(node, record);
        (healthy, ping)
    }

    /// Records a pong received from `socket`. Returns false if the pong does
    /// not answer an outstanding ping sent to that node.
    pub fn add(&mut self, pong: &Pong, socket: SocketAddr, now: u64) -> bool {
        let node = (*pong.from(), socket);
        match self.pending.peek(pong.hash()) {
            Some(expected) if *expected == node => {
                self.pending.pop(pong.hash());
            }
            _ => return false,
        }
        let mut record = self.records.pop(&node).unwrap_or_default();
        record.state = PingState::Healthy;
        record.last_pong_received = Some(now);
        self.records.put(node, record);
        true
    }

    /// Moves every node whose ping went unanswered past the timeout to
    /// `Failed`. Returns the number of nodes that failed.
    pub fn apply_timeouts(&mut self, now: u64) -> usize {
        let timeout = self.ping_timeout_ms;
        let mut num_failed = 0;
        for (_, record) in self.records.iter_mut() {
            let timed_out = record.state == PingState::Pending
                && record
                    .last_ping_sent
                    .is_some_and(|sent| now >= sent.saturating_add(timeout));
            if timed_out {
                record.state = PingState::Failed;
                num_failed += 1;
            }
        }
        num_failed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks the node healthy as if it had answered a ping.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn mock_pong(&mut self, node: (Pubkey, SocketAddr), now: u64) {
        let mut record = self.records.pop(&node).unwrap_or_default();
        record.state = PingState::Healthy;
        record.last_pong_received = Some(now);
        self.records.put(node, record);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rand::SeedableRng, rand_chacha::ChaChaRng};

    const TTL: u64 = 1_280_000;
    const RATE_LIMIT: u64 = 20_000;
    const TIMEOUT: u64 = 10_000;

    fn new_node() -> (Keypair, SocketAddr) {
        (Keypair::new(), "127.0.0.1:8001".parse().unwrap())
    }

    #[test]
    fn test_ping_pong() {
        let mut rng = ChaChaRng::seed_from_u64(0);
        let keypair = Keypair::new();
        let ping = Ping::new_rand(&mut rng, &keypair);
        assert!(ping.verify());
        assert_eq!(ping.sanitize(), Ok(()));
        let bytes = bincode::serialize(&ping).unwrap();
        let other: Ping = bincode::deserialize(&bytes).unwrap();
        assert_eq!(other, ping);

        let responder = Keypair::new();
        let pong = Pong::new(&ping, &responder);
        assert!(pong.verify());
        assert_eq!(pong.from(), &responder.pubkey());
        assert_eq!(*pong.hash(), hash_ping_token(&ping.token));
        let forged = Pong {
            from: keypair.pubkey(),
            ..pong
        };
        assert!(!forged.verify());
    }

    #[test]
    fn test_healthy_after_pong() {
        let mut rng = ChaChaRng::seed_from_u64(1);
        let this = Keypair::new();
        let (peer, addr) = new_node();
        let node = (peer.pubkey(), addr);
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        assert_eq!(cache.state(&node, 0), PingState::Unchecked);

        let (healthy, ping) = cache.check(&mut rng, &this, 0, node);
        assert!(!healthy);
        let ping = ping.unwrap();
        assert_eq!(cache.state(&node, 1), PingState::Pending);

        let pong = Pong::new(&ping, &peer);
        assert!(cache.add(&pong, addr, 5_000));
        assert_eq!(cache.state(&node, 5_000), PingState::Healthy);
        // Replayed pong is not outstanding anymore.
        assert!(!cache.add(&pong, addr, 5_001));
        let (healthy, ping) = cache.check(&mut rng, &this, 6_000, node);
        assert!(healthy);
        assert!(ping.is_none());
    }

    #[test]
    fn test_timeout_fails_and_rate_limits() {
        let mut rng = ChaChaRng::seed_from_u64(2);
        let this = Keypair::new();
        let (peer, addr) = new_node();
        let node = (peer.pubkey(), addr);
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        let mut pings_sent = vec![];
        for now in (0..60_000).step_by(1_000) {
            let (healthy, ping) = cache.check(&mut rng, &this, now, node);
            assert!(!healthy);
            if ping.is_some() {
                pings_sent.push(now);
            }
            cache.apply_timeouts(now);
            if now >= TIMEOUT && now < RATE_LIMIT {
                assert_eq!(cache.state(&node, now), PingState::Failed);
            }
        }
        assert_eq!(pings_sent, vec![0, 20_000, 40_000]);
        assert!(pings_sent.windows(2).all(|w| w[1] - w[0] >= RATE_LIMIT));
    }

    #[test]
    fn test_apply_timeouts() {
        let mut rng = ChaChaRng::seed_from_u64(3);
        let this = Keypair::new();
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        let nodes: Vec<_> = (0..4).map(|_| (solana_pubkey::new_rand(), new_node().1)).collect();
        for node in &nodes {
            cache.check(&mut rng, &this, 0, *node);
        }
        assert_eq!(cache.apply_timeouts(TIMEOUT - 1), 0);
        assert_eq!(cache.apply_timeouts(TIMEOUT), 4);
        assert_eq!(cache.apply_timeouts(TIMEOUT + 1), 0);
        assert!(nodes.iter().all(|node| cache.state(node, TIMEOUT) == PingState::Failed));
    }

    #[test]
    fn test_failed_node_recovers() {
        let mut rng = ChaChaRng::seed_from_u64(4);
        let this = Keypair::new();
        let (peer, addr) = new_node();
        let node = (peer.pubkey(), addr);
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        cache.check(&mut rng, &this, 0, node);
        cache.apply_timeouts(TIMEOUT);
        assert_eq!(cache.state(&node, TIMEOUT), PingState::Failed);
        let (_, ping) = cache.check(&mut rng, &this, RATE_LIMIT, node);
        let ping = ping.unwrap();
        assert_eq!(cache.state(&node, RATE_LIMIT), PingState::Pending);
        assert!(cache.add(&Pong::new(&ping, &peer), addr, RATE_LIMIT + 10));
        assert!(cache.is_healthy(&node, RATE_LIMIT + 10));
    }

    #[test]
    fn test_pong_expiry() {
        let mut rng = ChaChaRng::seed_from_u64(5);
        let this = Keypair::new();
        let (peer, addr) = new_node();
        let node = (peer.pubkey(), addr);
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        let (_, ping) = cache.check(&mut rng, &this, 0, node);
        assert!(cache.add(&Pong::new(&ping.unwrap(), &peer), addr, 0));
        // Refreshed early while still healthy.
        let (healthy, ping) = cache.check(&mut rng, &this, TTL / 8, node);
        assert!(healthy);
        assert!(ping.is_some());
        // The refresh ping was never answered; the old pong lapses.
        assert_eq!(cache.state(&node, TTL - 1), PingState::Healthy);
        assert_eq!(cache.state(&node, TTL), PingState::Pending);
        assert!(!cache.is_healthy(&node, TTL));
        let (healthy, ping) = cache.check(&mut rng, &this, TTL, node);
        assert!(!healthy);
        assert!(ping.is_some());
    }

    #[test]
    fn test_rejects_mismatched_pong() {
        let mut rng = ChaChaRng::seed_from_u64(6);
        let this = Keypair::new();
        let (peer, addr) = new_node();
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 128);
        let (_, ping) = cache.check(&mut rng, &this, 0, (peer.pubkey(), addr));
        let ping = ping.unwrap();
        // Unsolicited.
        let unsolicited = Ping::new_rand(&mut rng, &this);
        assert!(!cache.add(&Pong::new(&unsolicited, &peer), addr, 1));
        // Answered by a different identity.
        assert!(!cache.add(&Pong::new(&ping, &Keypair::new()), addr, 1));
        // Answered from a different address.
        let other_addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert!(!cache.add(&Pong::new(&ping, &peer), other_addr, 1));
        assert!(cache.add(&Pong::new(&ping, &peer), addr, 1));
    }

    #[test]
    fn test_capacity() {
        let mut rng = ChaChaRng::seed_from_u64(7);
        let this = Keypair::new();
        let mut cache = PingCache::new(TTL, RATE_LIMIT, TIMEOUT, 8);
        for _ in 0..32 {
            let node = (solana_pubkey::new_rand(), new_node().1);
            cache.check(&mut rng, &this, 0, node);
        }
        assert_eq!(cache.len(), 8);
    }
}
