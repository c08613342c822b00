//! A node's advertised identity and service addresses.

use {
    crate::gossip_data::MAX_WALLCLOCK,
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    std::net::{IpAddr, Ipv4Addr, SocketAddr},
};

/// Node contact information gossiped under the origin's label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pubkey: Pubkey,
    wallclock: u64,
    /// When the node instance was first created; identifies restarts.
    outset: u64,
    shred_version: u16,
    gossip: SocketAddr,
    tvu: SocketAddr,
    tpu: SocketAddr,
    rpc: SocketAddr,
    serve_repair: SocketAddr,
}

/// An address can carry gossip traffic if its port is assigned and its ip is
/// routable to a single host.
pub fn is_valid_address(addr: &SocketAddr) -> bool {
    addr.port() != 0 && !addr.ip().is_unspecified() && !addr.ip().is_multicast()
}

fn unspecified_socket_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

impl ContactInfo {
    pub fn new(pubkey: Pubkey, wallclock: u64, shred_version: u16) -> Self {
        Self {
            pubkey,
            wallclock,
            outset: wallclock,
            shred_version,
            gossip: unspecified_socket_addr(),
            tvu: unspecified_socket_addr(),
            tpu: unspecified_socket_addr(),
            rpc: unspecified_socket_addr(),
            serve_repair: unspecified_socket_addr(),
        }
    }

    /// Contact info with every service on consecutive localhost ports
    /// starting at `gossip_port`.
    pub fn new_localhost(pubkey: &Pubkey, gossip_port: u16, wallclock: u64) -> Self {
        let addr = |offset: u16| {
            SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                gossip_port.saturating_add(offset),
            )
        };
        Self {
            gossip: addr(0),
            tvu: addr(1),
            tpu: addr(2),
            rpc: addr(3),
            serve_repair: addr(4),
            ..Self::new(*pubkey, wallclock, 0)
        }
    }

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn new_rand<R: rand::Rng>(rng: &mut R, pubkey: Option<Pubkey>) -> Self {
        let pubkey = pubkey.unwrap_or_else(solana_pubkey::new_rand);
        let port = rng.random_range(1_024..u16::MAX - 8);
        let wallclock = rng.random_range(0..u64::from(u32::MAX));
        Self::new_localhost(&pubkey, port, wallclock)
    }

    pub fn pubkey(&self) -> &Pubkey {
        &self.pubkey
    }

    pub fn wallclock(&self) -> u64 {
        self.wallclock
    }

    pub fn set_wallclock(&mut self, wallclock: u64) {
        self.wallclock = wallclock;
    }

    pub fn outset(&self) -> u64 {
        self.outset
    }

    pub fn shred_version(&self) -> u16 {
        self.shred_version
    }

    pub fn set_shred_version(&mut self, shred_version: u16) {
        self.shred_version = shred_version;
    }

    /// Returns the gossip socket if it can carry traffic.
    pub fn gossip(&self) -> Option<SocketAddr> {
        is_valid_address(&self.gossip).then_some(self.gossip)
    }

    pub fn set_gossip(&mut self, addr: SocketAddr) {
        self.gossip = addr;
    }

    pub fn tvu(&self) -> Option<SocketAddr> {
        is_valid_address(&self.tvu).then_some(self.tvu)
    }

    pub fn tpu(&self) -> Option<SocketAddr> {
        is_valid_address(&self.tpu).then_some(self.tpu)
    }

    pub fn rpc(&self) -> Option<SocketAddr> {
        is_valid_address(&self.rpc).then_some(self.rpc)
    }

    pub fn serve_repair(&self) -> Option<SocketAddr> {
        is_valid_address(&self.serve_repair).then_some(self.serve_repair)
    }
}

impl Sanitize for ContactInfo {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        if self.wallclock >= MAX_WALLCLOCK || self.outset >= MAX_WALLCLOCK {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case("127.0.0.1:8001", true; "localhost")]
    #[test_case("10.0.0.7:8001", true; "private")]
    #[test_case("127.0.0.1:0", false; "zero port")]
    #[test_case("0.0.0.0:8001", false; "unspecified")]
    #[test_case("224.0.0.1:8001", false; "multicast")]
    #[test_case("[::]:8001", false; "unspecified v6")]
    fn test_is_valid_address(addr: &str, valid: bool) {
        let addr: SocketAddr = addr.parse().unwrap();
        assert_eq!(is_valid_address(&addr), valid);
    }

    #[test]
    fn test_new_has_no_gossip() {
        let node = ContactInfo::new(solana_pubkey::new_rand(), 10, 3);
        assert_eq!(node.gossip(), None);
        assert_eq!(node.outset(), 10);
        assert_eq!(node.shred_version(), 3);
    }

    #[test]
    fn test_new_localhost() {
        let pubkey = solana_pubkey::new_rand();
        let node = ContactInfo::new_localhost(&pubkey, 8000, 42);
        assert_eq!(node.pubkey(), &pubkey);
        assert_eq!(node.gossip(), Some("127.0.0.1:8000".parse().unwrap()));
        assert_eq!(node.serve_repair(), Some("127.0.0.1:8004".parse().unwrap()));
        assert_eq!(node.sanitize(), Ok(()));
    }

    #[test]
    fn test_sanitize_wallclock() {
        let mut node = ContactInfo::new(solana_pubkey::new_rand(), 0, 0);
        node.set_wallclock(MAX_WALLCLOCK);
        assert_eq!(node.sanitize(), Err(SanitizeError::ValueOutOfBounds));
    }
}
