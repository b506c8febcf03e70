//! Domain-separated hashing capability injected into trees and note algorithms

use crate::Hash32;

const DOMAIN_FIELD: u8 = 0x00;
const DOMAIN_COMPRESS: u8 = 0x01;

/// Hashing primitives the tree and note code are written against.
///
/// `compress` combines two child nodes into their parent. `hash_to_field`
/// maps arbitrary bytes to a single 32-byte element.
pub trait Hasher: Send + Sync {
    fn compress(&self, lhs: &Hash32, rhs: &Hash32) -> Hash32;
    fn hash_to_field(&self, data: &[u8]) -> Hash32;
}

/// Default blake3 instantiation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

impl Blake3Hasher {
    pub fn new() -> Self {
        Self
    }
}

impl Hasher for Blake3Hasher {
    /// node = H(0x01 || left || right)
    fn compress(&self, lhs: &Hash32, rhs: &Hash32) -> Hash32 {
        let mut data = [0u8; 1 + 32 + 32];
        data[0] = DOMAIN_COMPRESS;
        data[1..33].copy_from_slice(lhs);
        data[33..].copy_from_slice(rhs);
        blake3::hash(&data).into()
    }

    /// field = H(0x00 || data)
    fn hash_to_field(&self, data: &[u8]) -> Hash32 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[DOMAIN_FIELD]);
        hasher.update(data);
        hasher.finalize().into()
    }
}

/// Zero hashes for every level of a tree of height `depth`.
///
/// Level 0 is the empty leaf (all zero bytes), level `depth` is the root of
/// an empty tree.
pub fn compute_zero_hashes(hasher: &dyn Hasher, depth: u32) -> Vec<Hash32> {
    let mut zeros = Vec::with_capacity(depth as usize + 1);
    zeros.push([0u8; 32]);
    for level in 0..depth as usize {
        let prev = zeros[level];
        zeros.push(hasher.compress(&prev, &prev));
    }
    zeros
}
