//! Signed gossip values and the labels they are stored under.

use {
    crate::{
        contact_info::ContactInfo,
        gossip_data::{
            DuplicateShredIndex, EpochSlotsIndex, GossipData, GossipDataKind, VoteIndex,
        },
    },
    serde::{de::Deserializer, Deserialize, Serialize},
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
    solana_signature::Signature,
    solana_signer::Signer,
};

/// The label a value is deduplicated under. The table holds at most one live
/// value per label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GossipKey {
    ContactInfo(Pubkey),
    Vote(VoteIndex, Pubkey),
    LowestSlot(Pubkey),
    EpochSlots(EpochSlotsIndex, Pubkey),
    DuplicateShred(DuplicateShredIndex, Pubkey),
    NodeInstance(Pubkey),
}

impl GossipKey {
    pub fn pubkey(&self) -> Pubkey {
        match self {
            Self::ContactInfo(pubkey)
            | Self::LowestSlot(pubkey)
            | Self::NodeInstance(pubkey)
            | Self::Vote(_, pubkey)
            | Self::EpochSlots(_, pubkey)
            | Self::DuplicateShred(_, pubkey) => *pubkey,
        }
    }

    pub fn kind(&self) -> GossipDataKind {
        match self {
            Self::ContactInfo(_) => GossipDataKind::ContactInfo,
            Self::Vote(..) => GossipDataKind::Vote,
            Self::LowestSlot(_) => GossipDataKind::LowestSlot,
            Self::EpochSlots(..) => GossipDataKind::EpochSlots,
            Self::DuplicateShred(..) => GossipDataKind::DuplicateShred,
            Self::NodeInstance(_) => GossipDataKind::NodeInstance,
        }
    }
}

impl From<&GossipData> for GossipKey {
    fn from(data: &GossipData) -> Self {
        match data {
            GossipData::ContactInfo(node) => Self::ContactInfo(*node.pubkey()),
            GossipData::Vote(index, vote) => Self::Vote(*index, vote.from),
            GossipData::LowestSlot(slots) => Self::LowestSlot(slots.from),
            GossipData::EpochSlots(index, slots) => Self::EpochSlots(*index, slots.from),
            GossipData::DuplicateShred(index, shred) => Self::DuplicateShred(*index, shred.from),
            GossipData::NodeInstance(node) => Self::NodeInstance(node.from),
        }
    }
}

/// A [`GossipData`] payload together with its origin's signature.
///
/// The hash is computed once, over the value's bincode encoding, and is the
/// unit that pull filters and prune bookkeeping operate on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignedGossipData {
    signature: Signature,
    data: GossipData,
    #[serde(skip_serializing)]
    hash: Hash,
}

impl SignedGossipData {
    /// Sign `data` with `keypair`. The keypair should be the data's origin.
    pub fn new(data: GossipData, keypair: &Keypair) -> Self {
        let bincode_serialized_data = bincode::serialize(&data).unwrap_or_default();
        let signature = keypair.sign_message(&bincode_serialized_data);
        let hash = solana_sha256_hasher::hashv(&[signature.as_ref(), &bincode_serialized_data]);
        Self {
            signature,
            data,
            hash,
        }
    }

    /// Wrap `data` with a default signature. Such values fail [`verify`].
    ///
    /// [`verify`]: Self::verify
    pub fn new_unsigned(data: GossipData) -> Self {
        let signature = Signature::default();
        let bincode_serialized_data = bincode::serialize(&data).unwrap_or_default();
        let hash = solana_sha256_hasher::hashv(&[signature.as_ref(), &bincode_serialized_data]);
        Self {
            signature,
            data,
            hash,
        }
    }

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn new_rand<R: rand::Rng>(rng: &mut R, keypair: Option<&Keypair>) -> Self {
        match keypair {
            Some(keypair) => Self::new(GossipData::new_rand(rng, Some(keypair.pubkey())), keypair),
            None => {
                let keypair = Keypair::new();
                Self::new(GossipData::new_rand(rng, Some(keypair.pubkey())), &keypair)
            }
        }
    }

    pub fn verify(&self) -> bool {
        match bincode::serialize(&self.data) {
            Ok(bytes) => self.signature.verify(self.pubkey().as_ref(), &bytes),
            Err(_) => false,
        }
    }

    pub fn data(&self) -> &GossipData {
        &self.data
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn key(&self) -> GossipKey {
        GossipKey::from(&self.data)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.data.pubkey()
    }

    pub fn wallclock(&self) -> u64 {
        self.data.wallclock()
    }

    pub fn kind(&self) -> GossipDataKind {
        self.data.kind()
    }

    pub fn contact_info(&self) -> Option<&ContactInfo> {
        self.data.contact_info()
    }

    /// Size of the value's bincode encoding.
    pub fn bincode_serialized_size(&self) -> usize {
        bincode::serialized_size(self)
            .map(|size| size as usize)
            .unwrap_or(usize::MAX)
    }
}

impl<'de> Deserialize<'de> for SignedGossipData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct SignedGossipData {
            signature: Signature,
            data: GossipData,
        }
        let SignedGossipData { signature, data } = SignedGossipData::deserialize(deserializer)?;
        // Never trust a hash from the wire.
        let bincode_serialized_data =
            bincode::serialize(&data).map_err(serde::de::Error::custom)?;
        let hash = solana_sha256_hasher::hashv(&[signature.as_ref(), &bincode_serialized_data]);
        Ok(Self {
            signature,
            data,
            hash,
        })
    }
}

impl Sanitize for SignedGossipData {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        self.data.sanitize()
    }
}
