//! Seeded multi-hashing for Bloom filter indices.
//!
//! A filter needs `k` bit positions per member. They are drawn from one
//! seeded hash function by incrementing the seed: seed 1, 2, 3, ... Each draw
//! is masked to the bit width of the filter and rejected if it still falls
//! outside `[0, bit_count)`. Rejection keeps the distribution uniform where a
//! plain modulo would bias toward low indices.
//!
//! Hash functions are identified by a small integer so peers can state on the
//! wire which one built a filter. Lookup goes through an explicit
//! [`HashRegistry`] rather than process-wide state.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// A seeded 64-bit hash function.
pub type HashFn = fn(value: &[u8], seed: u64) -> u64;

/// Wire ID of XXH3 (64-bit, seeded). The default.
pub const XXH3_HASH_ID: u8 = 0;

/// Wire ID of the Blake3-derived seeded hash.
pub const BLAKE3_HASH_ID: u8 = 1;

/// XXH3-64 with the seed passed through.
pub fn xxh3_seeded(value: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(value, seed)
}

/// First 8 bytes (little endian) of Blake3(seed_le || value).
pub fn blake3_seeded(value: &[u8], seed: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(value);
    let digest = hasher.finalize();

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

/// Registry of seeded hash functions keyed by wire ID.
#[derive(Debug, Clone)]
pub struct HashRegistry {
    functions: BTreeMap<u8, (&'static str, HashFn)>,
}

impl HashRegistry {
    /// An empty registry. Filters cannot be built from it until something
    /// is registered.
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Registry with XXH3 (ID 0) and Blake3 (ID 1).
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register(XXH3_HASH_ID, "xxh3", xxh3_seeded)
            .register(BLAKE3_HASH_ID, "blake3", blake3_seeded);
        registry
    }

    /// Register (or replace) the function for `id`.
    pub fn register(&mut self, id: u8, name: &'static str, function: HashFn) -> &mut Self {
        self.functions.insert(id, (name, function));
        self
    }

    /// Look up the function for `id`.
    pub fn get(&self, id: u8) -> Result<HashFn> {
        self.functions
            .get(&id)
            .map(|(_, f)| *f)
            .ok_or(CoreError::UnknownHashFunction(id))
    }

    /// Name the function was registered under.
    pub fn name(&self, id: u8) -> Option<&'static str> {
        self.functions.get(&id).map(|(name, _)| *name)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.functions.contains_key(&id)
    }
}

impl Default for HashRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Iterator over the bit indices of one value in a filter of `bit_count` bits.
///
/// Yields exactly `hash_count` indices, each `< bit_count`. The sequence is a
/// pure function of `(value, bit_count, hash_count, hash)`.
pub struct Hasher<'a> {
    value: &'a [u8],
    hash: HashFn,
    bit_count: u64,
    mask: u64,
    hash_count: u64,
    emitted: u64,
    seed: u64,
}

impl<'a> Hasher<'a> {
    pub fn new(hash: HashFn, bit_count: u64, hash_count: u64, value: &'a [u8]) -> Self {
        let mask = bit_count
            .checked_next_power_of_two()
            .map_or(u64::MAX, |p| p - 1);

        Self {
            value,
            hash,
            bit_count,
            mask,
            hash_count,
            emitted: 0,
            seed: 1,
        }
    }
}

impl Iterator for Hasher<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.emitted >= self.hash_count || self.bit_count == 0 {
            return None;
        }

        loop {
            let candidate = (self.hash)(self.value, self.seed) & self.mask;
            self.seed = self.seed.wrapping_add(1);

            if candidate < self.bit_count {
                self.emitted += 1;
                return Some(candidate);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.bit_count == 0 {
            0
        } else {
            (self.hash_count - self.emitted) as usize
        };
        (remaining, Some(remaining))
    }
}
