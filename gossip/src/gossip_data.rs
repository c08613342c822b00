use {
    crate::contact_info::ContactInfo,
    bv::BitVec,
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
    solana_sanitize::{Sanitize, SanitizeError},
};

/// Wallclocks at or above this are rejected as malformed.
pub const MAX_WALLCLOCK: u64 = 1_000_000_000_000_000;
/// Upper bound on slot numbers carried by gossip values.
pub const MAX_SLOT: u64 = 1_000_000_000_000_000;

/// Number of vote slots each origin may occupy.
pub const MAX_VOTES: VoteIndex = 32;
/// Number of epoch-slots slots each origin may occupy.
pub const MAX_EPOCH_SLOTS: EpochSlotsIndex = 255;
/// Number of duplicate-shred chunks each origin may occupy.
pub const MAX_DUPLICATE_SHREDS: DuplicateShredIndex = 512;
/// Bits per epoch-slots bitmap.
pub const MAX_SLOTS_PER_ENTRY: u64 = 2048 * 8;

pub type VoteIndex = u8;
pub type EpochSlotsIndex = u8;
pub type DuplicateShredIndex = u16;

/// The payload of a gossip value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipData {
    ContactInfo(ContactInfo),
    Vote(VoteIndex, Vote),
    LowestSlot(LowestSlot),
    EpochSlots(EpochSlotsIndex, EpochSlots),
    DuplicateShred(DuplicateShredIndex, DuplicateShred),
    NodeInstance(NodeInstance),
}

/// Fieldless discriminant of [`GossipData`], used for per-type indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GossipDataKind {
    ContactInfo,
    Vote,
    LowestSlot,
    EpochSlots,
    DuplicateShred,
    NodeInstance,
}

impl GossipDataKind {
    pub const ALL: [Self; 6] = [
        Self::ContactInfo,
        Self::Vote,
        Self::LowestSlot,
        Self::EpochSlots,
        Self::DuplicateShred,
        Self::NodeInstance,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub from: Pubkey,
    pub slot: u64,
    /// Opaque serialized vote transaction.
    #[serde(with = "serde_bytes")]
    pub transaction: Vec<u8>,
    pub wallclock: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowestSlot {
    pub from: Pubkey,
    pub lowest: u64,
    pub wallclock: u64,
}

/// A run of slots starting at `first_slot`; bit `i` is set when the origin
/// holds slot `first_slot + i`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSlots {
    pub from: Pubkey,
    pub first_slot: u64,
    pub slots: BitVec<u8>,
    pub wallclock: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateShred {
    pub from: Pubkey,
    pub wallclock: u64,
    pub slot: u64,
    pub num_chunks: u8,
    pub chunk_index: u8,
    #[serde(with = "serde_bytes")]
    pub chunk: Vec<u8>,
}

/// Identifies a running node instance so duplicate instances of the same
/// identity can be detected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInstance {
    pub from: Pubkey,
    pub wallclock: u64,
    pub timestamp: u64,
    pub token: u64,
}

impl EpochSlots {
    pub fn new(from: Pubkey, first_slot: u64, wallclock: u64) -> Self {
        Self {
            from,
            first_slot,
            slots: BitVec::new(),
            wallclock,
        }
    }

    /// Marks `slot` as held, growing the bitmap as needed.
    /// Returns false if the slot is outside this entry's range.
    pub fn add(&mut self, slot: u64) -> bool {
        let Some(offset) = slot.checked_sub(self.first_slot) else {
            return false;
        };
        if offset >= MAX_SLOTS_PER_ENTRY {
            return false;
        }
        if offset >= self.slots.len() {
            self.slots.resize(offset.saturating_add(1), false);
        }
        self.slots.set(offset, true);
        true
    }

    pub fn contains(&self, slot: u64) -> bool {
        slot.checked_sub(self.first_slot)
            .filter(|offset| *offset < self.slots.len())
            .map(|offset| self.slots.get(offset))
            .unwrap_or(false)
    }
}

impl GossipData {
    /// The public key of the node that originated this value.
    pub fn pubkey(&self) -> Pubkey {
        match self {
            Self::ContactInfo(node) => *node.pubkey(),
            Self::Vote(_, vote) => vote.from,
            Self::LowestSlot(slots) => slots.from,
            Self::EpochSlots(_, slots) => slots.from,
            Self::DuplicateShred(_, shred) => shred.from,
            Self::NodeInstance(node) => node.from,
        }
    }

    pub fn wallclock(&self) -> u64 {
        match self {
            Self::ContactInfo(node) => node.wallclock(),
            Self::Vote(_, vote) => vote.wallclock,
            Self::LowestSlot(slots) => slots.wallclock,
            Self::EpochSlots(_, slots) => slots.wallclock,
            Self::DuplicateShred(_, shred) => shred.wallclock,
            Self::NodeInstance(node) => node.wallclock,
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

    pub fn contact_info(&self) -> Option<&ContactInfo> {
        match self {
            Self::ContactInfo(node) => Some(node),
            _ => None,
        }
    }

    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn new_rand<R: rand::Rng>(rng: &mut R, pubkey: Option<Pubkey>) -> Self {
        let from = pubkey.unwrap_or_else(solana_pubkey::new_rand);
        let wallclock = rng.random_range(0..u64::from(u32::MAX));
        match rng.random_range(0..6) {
            0 => Self::ContactInfo(ContactInfo::new_rand(rng, Some(from))),
            1 => Self::Vote(
                rng.random_range(0..MAX_VOTES),
                Vote {
                    from,
                    slot: rng.random_range(0..MAX_SLOT),
                    transaction: (0..rng.random_range(1..128)).map(|_| rng.random()).collect(),
                    wallclock,
                },
            ),
            2 => Self::LowestSlot(LowestSlot {
                from,
                lowest: rng.random_range(0..MAX_SLOT),
                wallclock,
            }),
            3 => {
                let mut slots = EpochSlots::new(from, rng.random_range(0..MAX_SLOT), wallclock);
                for _ in 0..rng.random_range(1..64) {
                    let offset = rng.random_range(0..1024);
                    slots.add(slots.first_slot.saturating_add(offset));
                }
                Self::EpochSlots(rng.random_range(0..MAX_EPOCH_SLOTS), slots)
            }
            4 => {
                let num_chunks = rng.random_range(1..=8);
                Self::DuplicateShred(
                    rng.random_range(0..MAX_DUPLICATE_SHREDS),
                    DuplicateShred {
                        from,
                        wallclock,
                        slot: rng.random_range(0..MAX_SLOT),
                        num_chunks,
                        chunk_index: rng.random_range(0..num_chunks),
                        chunk: (0..rng.random_range(1..256)).map(|_| rng.random()).collect(),
                    },
                )
            }
            _ => Self::NodeInstance(NodeInstance {
                from,
                wallclock,
                timestamp: wallclock,
                token: rng.random(),
            }),
        }
    }
}

fn sanitize_wallclock(wallclock: u64) -> Result<(), SanitizeError> {
    if wallclock >= MAX_WALLCLOCK {
        Err(SanitizeError::ValueOutOfBounds)
    } else {
        Ok(())
    }
}

fn sanitize_slot(slot: u64) -> Result<(), SanitizeError> {
    if slot >= MAX_SLOT {
        Err(SanitizeError::ValueOutOfBounds)
    } else {
        Ok(())
    }
}

impl Sanitize for GossipData {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        match self {
            Self::ContactInfo(node) => node.sanitize(),
            Self::Vote(index, vote) => {
                if *index >= MAX_VOTES {
                    return Err(SanitizeError::IndexOutOfBounds);
                }
                sanitize_wallclock(vote.wallclock)?;
                sanitize_slot(vote.slot)
            }
            Self::LowestSlot(slots) => {
                sanitize_wallclock(slots.wallclock)?;
                sanitize_slot(slots.lowest)
            }
            Self::EpochSlots(index, slots) => {
                if *index >= MAX_EPOCH_SLOTS {
                    return Err(SanitizeError::IndexOutOfBounds);
                }
                sanitize_wallclock(slots.wallclock)?;
                sanitize_slot(slots.first_slot)?;
                if slots.slots.len() > MAX_SLOTS_PER_ENTRY {
                    return Err(SanitizeError::ValueOutOfBounds);
                }
                Ok(())
            }
            Self::DuplicateShred(index, shred) => {
                if *index >= MAX_DUPLICATE_SHREDS {
                    return Err(SanitizeError::IndexOutOfBounds);
                }
                if shred.chunk_index >= shred.num_chunks {
                    return Err(SanitizeError::IndexOutOfBounds);
                }
                sanitize_wallclock(shred.wallclock)?;
                sanitize_slot(shred.slot)
            }
            Self::NodeInstance(node) => sanitize_wallclock(node.wallclock),
        }
    }
}
