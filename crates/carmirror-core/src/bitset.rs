//! Fixed-size bit vector backing the Bloom filter.

/// A fixed-size bit vector, least significant bit first within each byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    len: u64,
    bytes: Vec<u8>,
}

impl BitSet {
    /// Create a zeroed bit set holding `len` bits.
    pub fn new(len: u64) -> Self {
        Self {
            len,
            bytes: vec![0u8; Self::byte_len(len)],
        }
    }

    /// Create a bit set of `len` bits seeded from `bytes`.
    ///
    /// Short buffers are zero-extended; bits beyond `len` are dropped.
    pub fn from_bytes(len: u64, bytes: &[u8]) -> Self {
        let mut set = Self::new(len);
        let n = set.bytes.len().min(bytes.len());
        set.bytes[..n].copy_from_slice(&bytes[..n]);

        let tail = (len % 8) as u32;
        if tail != 0 {
            if let Some(last) = set.bytes.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }
        set
    }

    fn byte_len(len: u64) -> usize {
        len.div_ceil(8) as usize
    }

    /// Number of bits.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `i`. Out-of-range indices are ignored.
    pub fn set(&mut self, i: u64) {
        if i < self.len {
            self.bytes[(i / 8) as usize] |= 1 << (i % 8);
        }
    }

    /// Test bit `i`. Out-of-range indices read as unset.
    pub fn test(&self, i: u64) -> bool {
        i < self.len && self.bytes[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    /// Count of set bits.
    pub fn count_ones(&self) -> u64 {
        self.bytes.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    /// The raw backing bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
