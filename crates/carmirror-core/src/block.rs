//! Blocks: the content-addressed nodes of a DAG.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::Cid;

/// A DAG node: links to child blocks plus opaque payload bytes.
///
/// The identifier is derived from the links and data, so a block received
/// from a peer can be checked with [`Block::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    cid: Cid,
    links: Vec<Cid>,
    data: Bytes,
}

impl Block {
    /// Build a block and derive its identifier.
    pub fn new(data: impl Into<Bytes>, links: Vec<Cid>) -> Self {
        let data = data.into();
        let cid = Self::compute_cid(&links, &data);
        Self { cid, links, data }
    }

    /// A block with no children.
    pub fn leaf(data: impl Into<Bytes>) -> Self {
        Self::new(data, Vec::new())
    }

    /// Derive the identifier for the given links and data.
    ///
    /// Blake3("carmirror-block-v0:" || u64_le(links.len()) || links || data)
    pub fn compute_cid(links: &[Cid], data: &[u8]) -> Cid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"carmirror-block-v0:");
        hasher.update(&(links.len() as u64).to_le_bytes());
        for link in links {
            hasher.update(link.as_bytes());
        }
        hasher.update(data);
        Cid(*hasher.finalize().as_bytes())
    }

    /// Check that the carried identifier matches the content.
    pub fn verify(&self) -> Result<()> {
        let actual = Self::compute_cid(&self.links, &self.data);
        if actual != self.cid {
            return Err(CoreError::BlockHashMismatch {
                expected: self.cid,
                actual,
            });
        }
        Ok(())
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn links(&self) -> &[Cid] {
        &self.links
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_cid_deterministic() {
        let a = Block::new(&b"payload"[..], vec![Cid::from_bytes([1; 32])]);
        let b = Block::new(&b"payload"[..], vec![Cid::from_bytes([1; 32])]);
        assert_eq!(a.cid(), b.cid());
    }

    #[test]
    fn test_block_cid_depends_on_links() {
        let a = Block::new(&b"payload"[..], vec![]);
        let b = Block::new(&b"payload"[..], vec![Cid::from_bytes([1; 32])]);
        assert_ne!(a.cid(), b.cid());
    }

    #[test]
    fn test_block_verify_detects_tampering() {
        let block = Block::leaf(&b"honest"[..]);
        assert!(block.verify().is_ok());

        let forged = Block {
            cid: *block.cid(),
            links: vec![],
            data: Bytes::from_static(b"forged"),
        };
        assert!(matches!(
            forged.verify(),
            Err(CoreError::BlockHashMismatch { .. })
        ));
    }
}
