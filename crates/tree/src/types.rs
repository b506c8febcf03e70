//! Core types for the note tree

use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::hasher::Hasher;

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Sibling pairs from leaf level to the level just below the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashPath {
    #[serde(with = "crate::hex_serde::hash_pairs")]
    pub data: Vec<(Hash32, Hash32)>,
}

impl HashPath {
    pub fn new(data: Vec<(Hash32, Hash32)>) -> Self {
        Self { data }
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    /// Root implied by the top pair of the path.
    pub fn root(&self, hasher: &dyn Hasher) -> Option<Hash32> {
        self.data.last().map(|(l, r)| hasher.compress(l, r))
    }

    /// Recompute upward from `leaf` at `index` and check every level links to
    /// the next and the top compresses to `root`.
    pub fn verify(&self, hasher: &dyn Hasher, index: u64, leaf: &Hash32, root: &Hash32) -> bool {
        let mut current = *leaf;
        for (level, (l, r)) in self.data.iter().enumerate() {
            let is_right = (index >> level) & 1 == 1;
            let expected = if is_right { r } else { l };
            if *expected != current {
                return false;
            }
            current = hasher.compress(l, r);
        }
        current == *root
    }

    /// `count(u32 BE) | (left | right)*`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len() * 64);
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        for (l, r) in &self.data {
            out.extend_from_slice(l);
            out.extend_from_slice(r);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        if bytes.len() < 4 {
            return Err(TreeError::Corrupt("hash path too short".into()));
        }
        let count = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let body = &bytes[4..];
        if body.len() != count * 64 {
            return Err(TreeError::Corrupt(format!(
                "hash path of {count} levels needs {} bytes, got {}",
                count * 64,
                body.len()
            )));
        }
        let data = body
            .chunks_exact(64)
            .map(|c| {
                let mut l = [0u8; 32];
                let mut r = [0u8; 32];
                l.copy_from_slice(&c[..32]);
                r.copy_from_slice(&c[32..]);
                (l, r)
            })
            .collect();
        Ok(Self { data })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    #[serde(with = "crate::hex_serde::hash")]
    pub root: Hash32,
    pub size: u64,
}

/// One hypothetical leaf write for [`crate::MerkleTree::get_hash_paths`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafAddition {
    pub index: u64,
    #[serde(with = "crate::hex_serde::hash")]
    pub value: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashPathsResult {
    #[serde(with = "crate::hex_serde::hash")]
    pub old_root: Hash32,
    #[serde(with = "crate::hex_serde::hash_vec")]
    pub new_roots: Vec<Hash32>,
    pub old_hash_paths: Vec<HashPath>,
    pub new_hash_paths: Vec<HashPath>,
}
