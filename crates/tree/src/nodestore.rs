use std::collections::HashMap;

use crate::storage::WriteBatch;
use crate::Hash32;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct NodeId {
    /// 0 = leaf, depth = root
    pub level: u8,
    /// Position of the node within its level
    pub index: u64,
}

impl NodeId {
    pub fn new(level: u8, index: u64) -> Self {
        Self { level, index }
    }

    pub fn parent(&self) -> Self {
        Self { level: self.level + 1, index: self.index >> 1 }
    }

    pub fn sibling(&self) -> Self {
        Self { level: self.level, index: self.index ^ 1 }
    }

    pub fn is_right(&self) -> bool {
        self.index & 1 == 1
    }

    /// Index of the leftmost leaf covered by this node.
    pub fn first_leaf(&self) -> u64 {
        if self.level as u32 >= u64::BITS {
            return 0;
        }
        self.index << self.level
    }
}

/// `name | 0x00 | level(1) | index(8 BE)`
pub fn node_key(name: &str, id: NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 10);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key.push(id.level);
    key.extend_from_slice(&id.index.to_be_bytes());
    key
}

/// Metadata lives under the bare tree name.
pub fn meta_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Node writes staged in memory ahead of a single storage batch.
#[derive(Default, Clone)]
pub struct NodeOverlay {
    nodes: HashMap<NodeId, Hash32>,
}

impl NodeOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<Hash32> {
        self.nodes.get(id).copied()
    }

    pub fn insert(&mut self, id: NodeId, hash: Hash32) {
        self.nodes.insert(id, hash);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_batch(self, name: &str) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (id, hash) in self.nodes {
            batch.put(node_key(name, id), hash.to_vec());
        }
        batch
    }
}
