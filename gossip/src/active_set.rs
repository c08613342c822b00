use {
    crate::contact_info::ContactInfo,
    rand::{seq::IndexedRandom, Rng},
    solana_pubkey::Pubkey,
    std::net::SocketAddr,
};

/// Peers a node pushes new values to, resampled uniformly at random on a
/// fixed period.
pub struct ActiveSet {
    size: usize,
    rotation_period_ms: u64,
    last_rotated: Option<u64>,
    nodes: Vec<(Pubkey, SocketAddr)>,
}

/// Contact infos that may receive push or pull traffic from this node: same
/// shred version, a usable gossip address, not this node, and healthy.
pub fn eligible_peers<'a, I, F>(
    self_pubkey: &Pubkey,
    self_shred_version: u16,
    nodes: I,
    is_healthy: F,
) -> Vec<ContactInfo>
where
    I: IntoIterator<Item = &'a ContactInfo>,
    F: Fn(&(Pubkey, SocketAddr)) -> bool,
{
    nodes
        .into_iter()
        .filter(|node| node.pubkey() != self_pubkey)
        .filter(|node| node.shred_version() == self_shred_version)
        .filter(|node| {
            node.gossip()
                .is_some_and(|addr| is_healthy(&(*node.pubkey(), addr)))
        })
        .cloned()
        .collect()
}

impl ActiveSet {
    pub fn new(size: usize, rotation_period_ms: u64) -> Self {
        Self {
            size,
            rotation_period_ms,
            last_rotated: None,
            nodes: Vec::default(),
        }
    }

    pub fn needs_rotation(&self, now: u64) -> bool {
        self.nodes.is_empty()
            || self
                .last_rotated
                .is_none_or(|rotated| now >= rotated.saturating_add(self.rotation_period_ms))
    }

    /// Replaces the set with a uniform sample of `candidates`.
    pub fn rotate<R: Rng>(&mut self, rng: &mut R, now: u64, candidates: &[ContactInfo]) {
        self.nodes = candidates
            .choose_multiple(rng, self.size)
            .filter_map(|node| Some((*node.pubkey(), node.gossip()?)))
            .collect();
        self.last_rotated = Some(now);
    }

    /// Nodes that should receive a value from `origin`. Skips the origin
    /// itself, this node, peers that pruned the origin and peers no longer
    /// healthy.
    pub fn get_nodes<'a, P, H>(
        &'a self,
        self_pubkey: &'a Pubkey,
        origin: &'a Pubkey,
        is_pruned: P,
        is_healthy: H,
    ) -> impl Iterator<Item = &'a (Pubkey, SocketAddr)> + 'a
    where
        P: Fn(&Pubkey) -> bool + 'a,
        H: Fn(&(Pubkey, SocketAddr)) -> bool + 'a,
    {
        self.nodes.iter().filter(move |node| {
            let (pubkey, _) = node;
            pubkey != origin && pubkey != self_pubkey && !is_pruned(pubkey) && is_healthy(*node)
        })
    }

    pub fn nodes(&self) -> &[(Pubkey, SocketAddr)] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
