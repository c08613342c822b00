//! Wire messages exchanged between gossip nodes.

use {
    crate::{
        error::{GossipError, Result},
        gossip_pull::GossipFilter,
        gossip_stats::GossipStats,
        gossip_value::SignedGossipData,
        ping_pong::{Ping, Pong},
        prune::PruneData,
    },
    bincode::Options,
    log::{trace, warn},
    rayon::prelude::*,
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    static_assertions::const_assert_eq,
};

/// Largest datagram a gossip message may serialize to.
pub const MAX_PACKET_SIZE: usize = 1280;
/// Room left for values once the push message header
/// (enum tag, sender pubkey, vec length) is accounted for.
pub const PUSH_MESSAGE_MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - 44;
pub const PULL_RESPONSE_MAX_PAYLOAD_SIZE: usize = PUSH_MESSAGE_MAX_PAYLOAD_SIZE;

const_assert_eq!(PUSH_MESSAGE_MAX_PAYLOAD_SIZE, 1236);
const_assert_eq!(PULL_RESPONSE_MAX_PAYLOAD_SIZE, 1236);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum Protocol {
    /// Filter over what the caller has, plus the caller's contact info.
    PullRequest(GossipFilter, SignedGossipData),
    PullResponse(Pubkey, Vec<SignedGossipData>),
    PushMessage(Pubkey, Vec<SignedGossipData>),
    PruneMessage(Pubkey, PruneData),
    PingMessage(Ping),
    PongMessage(Pong),
}

impl Protocol {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PullRequest(..) => "pull_request",
            Self::PullResponse(..) => "pull_response",
            Self::PushMessage(..) => "push",
            Self::PruneMessage(..) => "prune",
            Self::PingMessage(_) => "ping",
            Self::PongMessage(_) => "pong",
        }
    }

    /// Serializes the message, failing if it does not fit in one packet.
    pub fn to_packet(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(GossipError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Parses, sanitizes and verifies an inbound packet. Anything that fails
    /// is counted and dropped.
    pub fn from_packet(bytes: &[u8], stats: &GossipStats) -> Option<Self> {
        let protocol: Self = match bincode::options()
            .with_limit(MAX_PACKET_SIZE as u64)
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .deserialize(bytes)
        {
            Ok(protocol) => protocol,
            Err(err) => {
                trace!("malformed gossip packet: {err}");
                stats.packets_malformed.inc();
                return None;
            }
        };
        if let Err(err) = protocol.sanitize() {
            trace!("{} failed sanitize: {err}", protocol.kind());
            stats.packets_failed_sanitize.inc();
            return None;
        }
        let protocol = protocol.par_verify(stats);
        if protocol.is_none() {
            stats.packets_failed_verify.inc();
        }
        protocol
    }

    /// Verifies signatures. Push messages and pull responses keep whichever
    /// values verify; every other message is all or nothing.
    pub fn par_verify(self, stats: &GossipStats) -> Option<Self> {
        match self {
            Self::PullResponse(from, values) => {
                let values = verify_values(values, stats);
                (!values.is_empty()).then_some(Self::PullResponse(from, values))
            }
            Self::PushMessage(from, values) => {
                let values = verify_values(values, stats);
                (!values.is_empty()).then_some(Self::PushMessage(from, values))
            }
            _ => {
                let verified = match &self {
                    Self::PullRequest(_, caller) => caller.verify(),
                    Self::PruneMessage(_, data) => data.verify(),
                    Self::PingMessage(ping) => ping.verify(),
                    Self::PongMessage(pong) => pong.verify(),
                    Self::PullResponse(..) | Self::PushMessage(..) => true,
                };
                verified.then_some(self)
            }
        }
    }
}

fn verify_values(values: Vec<SignedGossipData>, stats: &GossipStats) -> Vec<SignedGossipData> {
    let size = values.len();
    let values: Vec<_> = values.into_par_iter().filter(SignedGossipData::verify).collect();
    stats.values_failed_verify.add_relaxed((size - values.len()) as u64);
    values
}

impl Sanitize for Protocol {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        match self {
            Self::PullRequest(filter, caller) => {
                filter.sanitize()?;
                caller.sanitize()
            }
            Self::PullResponse(_, values) | Self::PushMessage(_, values) => {
                values.iter().try_for_each(Sanitize::sanitize)
            }
            Self::PruneMessage(from, data) => {
                if *from != data.pubkey {
                    return Err(SanitizeError::InvalidValue);
                }
                data.sanitize()
            }
            Self::PingMessage(ping) => ping.sanitize(),
            Self::PongMessage(pong) => pong.sanitize(),
        }
    }
}

/// Greedily packs values into chunks whose serialized size stays within
/// `max_chunk_size`. Values that cannot fit in any chunk are dropped.
pub fn split_gossip_messages<I>(
    max_chunk_size: usize,
    values: I,
) -> impl Iterator<Item = Vec<SignedGossipData>>
where
    I: IntoIterator<Item = SignedGossipData>,
{
    let mut values = values.into_iter().peekable();
    std::iter::from_fn(move || {
        let mut chunk = Vec::new();
        let mut chunk_size = 0;
        while let Some(value) = values.peek() {
            let size = value.bincode_serialized_size();
            if size > max_chunk_size {
                warn!(
                    "dropping gossip value of {size} bytes from {}, larger than {max_chunk_size}",
                    value.pubkey()
                );
                values.next();
                continue;
            }
            if chunk_size + size > max_chunk_size {
                break;
            }
            chunk_size += size;
            chunk.extend(values.next());
        }
        (!chunk.is_empty()).then_some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            contact_info::ContactInfo,
            gossip_data::{GossipData, Vote},
            gossip_pull::MAX_BLOOM_SIZE,
        },
        assert_matches::assert_matches,
        rand::SeedableRng,
        rand_chacha::ChaChaRng,
        solana_keypair::Keypair,
        solana_signer::Signer,
    };

    fn new_vote(keypair: &Keypair, transaction_size: usize) -> SignedGossipData {
        let data = GossipData::Vote(
            0,
            Vote {
                from: keypair.pubkey(),
                slot: 1,
                transaction: vec![7u8; transaction_size],
                wallclock: 1,
            },
        );
        SignedGossipData::new(data, keypair)
    }

    #[test]
    fn test_message_header_size() {
        let from = solana_pubkey::new_rand();
        let push = Protocol::PushMessage(from, vec![]);
        let response = Protocol::PullResponse(from, vec![]);
        assert_eq!(bincode::serialized_size(&push).unwrap(), 44);
        assert_eq!(bincode::serialized_size(&response).unwrap(), 44);
    }

    #[test]
    fn test_split_gossip_messages() {
        let mut rng = ChaChaRng::seed_from_u64(0);
        let keypair = Keypair::new();
        let values: Vec<SignedGossipData> = (0..200)
            .map(|_| SignedGossipData::new_rand(&mut rng, Some(&keypair)))
            .collect();
        let chunks: Vec<_> =
            split_gossip_messages(PUSH_MESSAGE_MAX_PAYLOAD_SIZE, values.clone()).collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), values);
        for chunk in chunks {
            let message = Protocol::PushMessage(keypair.pubkey(), chunk);
            let packet = message.to_packet().unwrap();
            assert!(packet.len() <= MAX_PACKET_SIZE);
        }
    }

    #[test]
    fn test_split_drops_oversized_values() {
        let keypair = Keypair::new();
        let small = new_vote(&keypair, 10);
        let large = new_vote(&keypair, MAX_PACKET_SIZE);
        let chunks: Vec<_> = split_gossip_messages(
            PUSH_MESSAGE_MAX_PAYLOAD_SIZE,
            vec![small.clone(), large.clone(), small.clone()],
        )
        .collect();
        assert_eq!(chunks, vec![vec![small.clone(), small]]);
        let message = Protocol::PushMessage(keypair.pubkey(), vec![large]);
        assert_matches!(
            message.to_packet(),
            Err(GossipError::MessageTooLarge { max: MAX_PACKET_SIZE, .. })
        );
    }

    #[test]
    fn test_pull_request_fits_in_packet() {
        let keypair = Keypair::new();
        let node = ContactInfo::new_localhost(&keypair.pubkey(), 8000, 1);
        let caller = SignedGossipData::new(GossipData::ContactInfo(node), &keypair);
        let filter = GossipFilter::new_rand(100_000, MAX_BLOOM_SIZE);
        let packet = Protocol::PullRequest(filter, caller).to_packet().unwrap();
        assert!(packet.len() <= MAX_PACKET_SIZE, "{} bytes", packet.len());
    }

    #[test]
    fn test_from_packet() {
        let stats = GossipStats::default();
        let keypair = Keypair::new();
        let mut rng = ChaChaRng::seed_from_u64(1);
        let ping = Protocol::PingMessage(Ping::new_rand(&mut rng, &keypair));
        let packet = ping.to_packet().unwrap();
        assert_eq!(Protocol::from_packet(&packet, &stats), Some(ping));
        // Truncated.
        assert_eq!(Protocol::from_packet(&packet[..packet.len() - 1], &stats), None);
        assert_eq!(stats.packets_malformed.get(), 1);
        // Trailing garbage.
        let mut padded = packet.clone();
        padded.push(0);
        assert_eq!(Protocol::from_packet(&padded, &stats), None);
        assert_eq!(stats.packets_malformed.get(), 2);
        // Prune sender must match the signer.
        let destination = solana_pubkey::new_rand();
        let data = PruneData::new_signed(&keypair, vec![solana_pubkey::new_rand()], destination, 1)
            .pop()
            .unwrap();
        let prune = Protocol::PruneMessage(solana_pubkey::new_rand(), data.clone());
        assert_eq!(Protocol::from_packet(&prune.to_packet().unwrap(), &stats), None);
        assert_eq!(stats.packets_failed_sanitize.get(), 1);
        let prune = Protocol::PruneMessage(keypair.pubkey(), data);
        assert_eq!(Protocol::from_packet(&prune.to_packet().unwrap(), &stats), Some(prune));
    }

    #[test]
    fn test_verify_drops_forged_values() {
        let stats = GossipStats::default();
        let keypair = Keypair::new();
        let good = new_vote(&keypair, 10);
        let forged = SignedGossipData::new_unsigned(new_vote(&Keypair::new(), 10).data().clone());
        let push = Protocol::PushMessage(keypair.pubkey(), vec![good.clone(), forged.clone()]);
        let packet = push.to_packet().unwrap();
        assert_eq!(
            Protocol::from_packet(&packet, &stats),
            Some(Protocol::PushMessage(keypair.pubkey(), vec![good]))
        );
        assert_eq!(stats.values_failed_verify.get(), 1);
        assert_eq!(stats.packets_failed_verify.get(), 0);
        let push = Protocol::PushMessage(keypair.pubkey(), vec![forged]);
        assert_eq!(Protocol::from_packet(&push.to_packet().unwrap(), &stats), None);
        assert_eq!(stats.values_failed_verify.get(), 2);
        assert_eq!(stats.packets_failed_verify.get(), 1);
    }
}
