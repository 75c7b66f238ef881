//! Golden test vectors for Bloom filter sizing.
//!
//! Peers size filters independently, so these must hold on every
//! implementation for filters to be exchanged without surprises.

use carmirror_core::BloomFilter;

/// A golden sizing vector.
#[derive(Debug, Clone)]
pub struct FilterVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Expected element count.
    pub n: u64,
    /// Target false-positive rate.
    pub fpp: f64,
    /// Estimated bit count, before rounding.
    pub bit_count: u64,
    /// Estimated hash count.
    pub hash_count: u64,
    /// Bit count of a filter built from the estimate.
    pub rounded_bit_count: u64,
}

/// Get all golden sizing vectors.
pub fn all_vectors() -> Vec<FilterVector> {
    vec![
        FilterVector {
            name: "thousand at one percent",
            n: 1000,
            fpp: 0.01,
            bit_count: 9586,
            hash_count: 7,
            rounded_bit_count: 16384,
        },
        FilterVector {
            name: "single element at one half",
            n: 1,
            fpp: 0.5,
            bit_count: 2,
            hash_count: 2,
            rounded_bit_count: 2,
        },
        FilterVector {
            name: "hundred at one per mille",
            n: 100,
            fpp: 0.001,
            bit_count: 1438,
            hash_count: 10,
            rounded_bit_count: 2048,
        },
        FilterVector {
            name: "ten thousand at default rate",
            n: 10_000,
            fpp: 0.0001,
            bit_count: 191_702,
            hash_count: 14,
            rounded_bit_count: 262_144,
        },
        FilterVector {
            name: "fifty at ten percent",
            n: 50,
            fpp: 0.1,
            bit_count: 240,
            hash_count: 4,
            rounded_bit_count: 256,
        },
    ]
}

/// Check every vector; returns `(name, matches, (bits, hashes, rounded))`.
pub fn verify_all_vectors() -> Vec<(String, bool, (u64, u64, u64))> {
    all_vectors()
        .iter()
        .map(|v| {
            let (bits, hashes) = BloomFilter::estimate_parameters(v.n, v.fpp);
            let rounded = BloomFilter::new(bits, hashes).bit_count();
            let matches =
                bits == v.bit_count && hashes == v.hash_count && rounded == v.rounded_bit_count;
            (v.name.to_string(), matches, (bits, hashes, rounded))
        })
        .collect()
}

/// Expected false-positive rate of the 1000-element vector's filter when
/// full: `(1 - e^(-7 * 1000 / 16384))^7`.
pub const THOUSAND_AT_CAPACITY_FPP: f64 = 0.000614;
