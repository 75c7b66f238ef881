//! Bloom filter used to advertise the blocks a peer already holds.
//!
//! INVARIANTS:
//! - `bit_count` is a power of two, at least 1
//! - `hash_count` is at least 1
//! - No false negatives: after `add(v)`, `test(v)` is true
//!
//! The power-of-two size lets the seeded hasher mask instead of reduce, and
//! it means a filter rebuilt from `(bit_count, hash_count, bytes)` on the
//! other side of the wire is bit-for-bit the same filter.

use std::f64::consts::LN_2;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::bitset::BitSet;
use crate::error::Result;
use crate::hasher::{xxh3_seeded, HashFn, HashRegistry, Hasher, XXH3_HASH_ID};

/// Probabilistic set of byte strings.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bit_count: u64,
    hash_count: u64,
    hash_id: u8,
    hash: HashFn,
    bits: BitSet,
}

/// Wire form of a [`BloomFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPayload {
    pub bit_count: u64,
    pub hash_count: u64,
    pub hash_function: u8,
    pub bytes: Bytes,
}

/// Sizes above 2^63 cannot round up and are clamped to 2^63. Peer filters
/// never get here: message validation caps them at 2^27 bits.
fn safe_bit_count(bit_count: u64) -> u64 {
    bit_count
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or(1 << 63)
}

impl BloomFilter {
    /// Create an empty filter using XXH3.
    ///
    /// `bit_count` is rounded up to the next power of two and `hash_count`
    /// is raised to 1 if zero.
    pub fn new(bit_count: u64, hash_count: u64) -> Self {
        Self::build(XXH3_HASH_ID, xxh3_seeded, bit_count, hash_count, &[])
    }

    /// Create a filter using XXH3 whose bits start as `bytes`.
    pub fn from_bytes(bit_count: u64, hash_count: u64, bytes: &[u8]) -> Self {
        Self::build(XXH3_HASH_ID, xxh3_seeded, bit_count, hash_count, bytes)
    }

    /// Create an empty filter with the hash function registered under `hash_id`.
    pub fn with_hash(
        registry: &HashRegistry,
        hash_id: u8,
        bit_count: u64,
        hash_count: u64,
    ) -> Result<Self> {
        let hash = registry.get(hash_id)?;
        Ok(Self::build(hash_id, hash, bit_count, hash_count, &[]))
    }

    /// Rebuild a filter received from a peer.
    pub fn from_payload(registry: &HashRegistry, payload: &FilterPayload) -> Result<Self> {
        let hash = registry.get(payload.hash_function)?;
        Ok(Self::build(
            payload.hash_function,
            hash,
            payload.bit_count,
            payload.hash_count,
            &payload.bytes,
        ))
    }

    /// Create a filter sized for `n` elements at false-positive rate `fpp`.
    pub fn with_estimates(n: u64, fpp: f64) -> Self {
        let (bit_count, hash_count) = Self::estimate_parameters(n, fpp);
        Self::new(bit_count, hash_count)
    }

    /// As [`with_estimates`](Self::with_estimates), with a registered hash function.
    pub fn with_estimates_and_hash(
        registry: &HashRegistry,
        hash_id: u8,
        n: u64,
        fpp: f64,
    ) -> Result<Self> {
        let (bit_count, hash_count) = Self::estimate_parameters(n, fpp);
        Self::with_hash(registry, hash_id, bit_count, hash_count)
    }

    fn build(hash_id: u8, hash: HashFn, bit_count: u64, hash_count: u64, bytes: &[u8]) -> Self {
        let bit_count = safe_bit_count(bit_count);
        Self {
            bit_count,
            hash_count: hash_count.max(1),
            hash_id,
            hash,
            bits: BitSet::from_bytes(bit_count, bytes),
        }
    }

    /// Estimate `(bit_count, hash_count)` for `n` elements at rate `fpp`.
    ///
    /// - m = ceil(-n * ln(fpp) / ln(2)^2)
    /// - k = ceil(m / n * ln(2))
    ///
    /// `n == 0` is not guarded; the result degenerates to `(0, 0)`, which
    /// the constructors clamp to `(1, 1)`.
    pub fn estimate_parameters(n: u64, fpp: f64) -> (u64, u64) {
        let n = n as f64;
        let bit_count = (-n * fpp.ln() / (LN_2 * LN_2)).ceil();
        let hash_count = (bit_count / n * LN_2).ceil();
        (bit_count as u64, hash_count as u64)
    }

    /// Add a member. Returns `self` for chaining.
    pub fn add(&mut self, value: &[u8]) -> &mut Self {
        for index in Hasher::new(self.hash, self.bit_count, self.hash_count, value) {
            self.bits.set(index);
        }
        self
    }

    /// Returns true if `value` may be a member; false means definitely not.
    pub fn test(&self, value: &[u8]) -> bool {
        Hasher::new(self.hash, self.bit_count, self.hash_count, value)
            .all(|index| self.bits.test(index))
    }

    /// Expected false-positive rate with `n` members: (1 - e^(-kn/m))^k.
    pub fn fpp(&self, n: u64) -> f64 {
        let k = self.hash_count as f64;
        let m = self.bit_count as f64;
        (1.0 - (-k * n as f64 / m).exp()).powf(k)
    }

    /// Filter size in bits.
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Number of hash draws per member.
    pub fn hash_count(&self) -> u64 {
        self.hash_count
    }

    /// Wire ID of the hash function.
    pub fn hash_function(&self) -> u8 {
        self.hash_id
    }

    /// The bit vector.
    pub fn bytes(&self) -> &[u8] {
        self.bits.as_bytes()
    }

    /// Fraction of bits set.
    pub fn saturation(&self) -> f64 {
        self.bits.count_ones() as f64 / self.bit_count as f64
    }

    pub fn to_payload(&self) -> FilterPayload {
        FilterPayload {
            bit_count: self.bit_count,
            hash_count: self.hash_count,
            hash_function: self.hash_id,
            bytes: Bytes::copy_from_slice(self.bits.as_bytes()),
        }
    }
}
