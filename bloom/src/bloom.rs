//! Simple Bloom Filter

use {
    bv::BitVec,
    fnv::FnvHasher,
    rand::Rng,
    serde::{Deserialize, Serialize},
    solana_sanitize::{Sanitize, SanitizeError},
    std::{cmp, fmt, hash::Hasher, marker::PhantomData},
};

/// Upper bound on the number of hash functions a received filter may carry.
pub const MAX_NUM_KEYS: usize = 64;

/// Generate a stable hash of `self` for each `hash_index`
/// Best effort can be made for uniqueness of each hash.
pub trait BloomHashIndex {
    fn hash_at_index(&self, hash_index: u64) -> u64;
}

impl<T: AsRef<[u8]>> BloomHashIndex for T {
    fn hash_at_index(&self, hash_index: u64) -> u64 {
        let mut hasher = FnvHasher::with_key(hash_index);
        hasher.write(self.as_ref());
        hasher.finish()
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(bound = "")]
pub struct Bloom<T: BloomHashIndex> {
    pub keys: Vec<u64>,
    pub bits: BitVec<u64>,
    num_bits_set: u64,
    _phantom: PhantomData<T>,
}

impl<T: BloomHashIndex> fmt::Debug for Bloom<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Bloom {{ keys.len: {} bits.len: {} num_set: {} }}",
            self.keys.len(),
            self.bits.len(),
            self.num_bits_set,
        )
    }
}

impl<T: BloomHashIndex> Sanitize for Bloom<T> {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        if self.keys.is_empty() || self.keys.len() > MAX_NUM_KEYS {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        // A zero length bit vector cannot be indexed.
        if self.bits.len() == 0 || self.num_bits_set > self.bits.len() {
            return Err(SanitizeError::InvalidValue);
        }
        Ok(())
    }
}

impl<T: BloomHashIndex> Bloom<T> {
    pub fn new(num_bits: usize, keys: Vec<u64>) -> Self {
        let bits = BitVec::new_fill(false, cmp::max(num_bits, 1) as u64);
        Bloom {
            keys,
            bits,
            num_bits_set: 0,
            _phantom: PhantomData,
        }
    }

    /// Create filter optimal for num size given the `FALSE_RATE`.
    ///
    /// The keys are randomized for picking data out of a collision resistant
    /// hash of size `keysize` bytes.
    ///
    /// See <https://hur.st/bloomfilter/>.
    pub fn random(num_items: usize, false_rate: f64, max_bits: usize) -> Self {
        let mut rng = rand::rng();
        Self::random_with(&mut rng, num_items, false_rate, max_bits)
    }

    pub fn random_with<R: Rng + ?Sized>(
        rng: &mut R,
        num_items: usize,
        false_rate: f64,
        max_bits: usize,
    ) -> Self {
        let m = Self::num_bits(num_items as f64, false_rate);
        let num_bits = cmp::max(1, cmp::min(m as usize, max_bits));
        let num_keys = Self::num_keys(num_bits as f64, num_items as f64) as usize;
        let keys: Vec<u64> = (0..num_keys).map(|_| rng.random()).collect();
        Self::new(num_bits, keys)
    }

    fn num_bits(num_items: f64, false_rate: f64) -> f64 {
        let n = num_items;
        let p = false_rate;
        ((n * p.ln()) / (1f64 / 2f64.powf(2f64.ln())).ln()).ceil()
    }

    fn num_keys(num_bits: f64, num_items: f64) -> f64 {
        if num_items == 0f64 {
            return 1f64;
        }
        let k = ((num_bits / num_items) * 2f64.ln()).round();
        k.clamp(1f64, MAX_NUM_KEYS as f64)
    }

    fn pos(&self, key: &T, k: u64) -> u64 {
        key.hash_at_index(k)
            .checked_rem(self.bits.len())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.bits = BitVec::new_fill(false, self.bits.len());
        self.num_bits_set = 0;
    }

    pub fn add(&mut self, key: &T) {
        for k in &self.keys {
            let pos = self.pos(key, *k);
            if !self.bits.get(pos) {
                self.num_bits_set = self.num_bits_set.saturating_add(1);
                self.bits.set(pos, true);
            }
        }
    }

    pub fn contains(&self, key: &T) -> bool {
        for k in &self.keys {
            let pos = self.pos(key, *k);
            if !self.bits.get(pos) {
                return false;
            }
        }
        true
    }

    pub fn num_bits_set(&self) -> u64 {
        self.num_bits_set
    }

    /// Fraction of set bits; a saturated filter reports everything present.
    pub fn fill_ratio(&self) -> f64 {
        self.num_bits_set as f64 / self.bits.len() as f64
    }
}
