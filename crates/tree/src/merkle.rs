use std::sync::Arc;

use crate::error::{Result, TreeError};
use crate::hasher::{compute_zero_hashes, Hasher};
use crate::nodestore::{meta_key, node_key, NodeId, NodeOverlay};
use crate::storage::Storage;
use crate::{Hash32, HashPath, HashPathsResult, LeafAddition, TreeState};

/// Deepest tree we can index with `u64` leaf positions.
pub const MAX_DEPTH: u32 = 63;

const META_LEN: usize = 32 + 8 + 1;

/// Append-optimised binary Merkle tree persisted node by node.
///
/// Leaves `[0, size)` hold inserted values; everything to the right is the
/// zero hash of its level and never touches storage.
pub struct MerkleTree<S: Storage> {
    storage: S,
    hasher: Arc<dyn Hasher>,
    name: String,
    depth: u32,
    root: Hash32,
    size: u64,
    zero_hashes: Vec<Hash32>,
}

impl<S: Storage> MerkleTree<S> {
    /// Empty tree; nothing is written until the first update.
    pub fn new(storage: S, hasher: Arc<dyn Hasher>, name: impl Into<String>, depth: u32) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth(depth));
        }
        let zero_hashes = compute_zero_hashes(hasher.as_ref(), depth);
        let root = zero_hashes[depth as usize];
        Ok(Self {
            storage,
            hasher,
            name: name.into(),
            depth,
            root,
            size: 0,
            zero_hashes,
        })
    }

    /// Restore a tree from its persisted metadata, or create it empty.
    pub fn open(storage: S, hasher: Arc<dyn Hasher>, name: impl Into<String>, depth: u32) -> Result<Self> {
        let mut tree = Self::new(storage, hasher, name, depth)?;
        if let Some(meta) = tree.storage.get(&meta_key(&tree.name))? {
            let (root, size, stored_depth) = decode_meta(&meta)?;
            if stored_depth != depth {
                return Err(TreeError::Corrupt(format!(
                    "tree {} persisted with depth {stored_depth}, opened with {depth}",
                    tree.name
                )));
            }
            tree.root = root;
            tree.size = size;
        }
        Ok(tree)
    }

    /// Re-read root and size from storage, e.g. after another handle on
    /// the same store appended leaves.
    pub fn reload(&mut self) -> Result<()> {
        self.storage.refresh()?;
        match self.storage.get(&meta_key(&self.name))? {
            Some(meta) => {
                let (root, size, _) = decode_meta(&meta)?;
                self.root = root;
                self.size = size;
            }
            None => {
                self.root = self.zero_hashes[self.depth as usize];
                self.size = 0;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> Hash32 {
        self.root
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn state(&self) -> TreeState {
        TreeState { root: self.root, size: self.size }
    }

    pub fn hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    pub fn zero_hash(&self, level: u32) -> Hash32 {
        self.zero_hashes[level as usize]
    }

    pub fn get_hash_path(&self, index: u64) -> Result<HashPath> {
        self.check_index(index)?;
        self.hash_path_with(None, index)
    }

    /// Hash `value` to a leaf and write it at `index`.
    pub fn update_element(&mut self, index: u64, value: &[u8]) -> Result<()> {
        let leaf = self.hasher.hash_to_field(value);
        self.apply_sequential(index, &[leaf])
    }

    /// Sequential element updates committed as one storage batch.
    pub fn update_elements<V: AsRef<[u8]>>(&mut self, index: u64, values: &[V]) -> Result<()> {
        let leaves: Vec<Hash32> = values
            .iter()
            .map(|v| self.hasher.hash_to_field(v.as_ref()))
            .collect();
        self.apply_sequential(index, &leaves)
    }

    pub fn update_leaf_hash(&mut self, index: u64, leaf: Hash32) -> Result<()> {
        self.apply_sequential(index, &[leaf])
    }

    /// Bulk insertion of pre-hashed leaves at the right edge of the tree.
    ///
    /// `index` must be at or beyond the current size and a multiple of the
    /// largest power of two not exceeding `leaves.len()`. The range is split
    /// into maximal aligned power-of-two chunks; each chunk's subtree is
    /// hashed once in memory and only its boundary path is propagated.
    pub fn update_leaf_hashes(&mut self, index: u64, leaves: &[Hash32]) -> Result<()> {
        if leaves.is_empty() {
            return Ok(());
        }
        if index < self.size {
            return Err(TreeError::InvalidInsertion(format!(
                "bulk insertion at {index} would overwrite leaves below size {}",
                self.size
            )));
        }
        let len = leaves.len() as u64;
        let end = index
            .checked_add(len)
            .ok_or(TreeError::IndexOutOfRange { index, capacity: self.capacity() })?;
        if end > self.capacity() {
            return Err(TreeError::IndexOutOfRange { index: end - 1, capacity: self.capacity() });
        }
        let alignment = largest_power_of_two_le(len);
        if index % alignment != 0 {
            return Err(TreeError::InvalidInsertion(format!(
                "index {index} not aligned to chunk of {alignment} leaves"
            )));
        }

        let mut overlay = NodeOverlay::new();
        let mut root = self.root;
        let mut cursor = index;
        let mut offset = 0usize;
        while offset < leaves.len() {
            let remaining = (leaves.len() - offset) as u64;
            let mut chunk = largest_power_of_two_le(remaining);
            while cursor % chunk != 0 {
                chunk >>= 1;
            }
            let chunk_leaves = &leaves[offset..offset + chunk as usize];
            let (top, hash) = self.insert_subtree(&mut overlay, cursor, chunk_leaves);
            root = self.propagate(&mut overlay, top, hash)?;
            cursor += chunk;
            offset += chunk as usize;
        }

        self.commit(overlay, root, end)
    }

    /// Paths and roots for a series of hypothetical leaf writes, applied
    /// cumulatively in order. Nothing is persisted.
    pub fn get_hash_paths(&self, additions: &[LeafAddition]) -> Result<HashPathsResult> {
        let mut overlay = NodeOverlay::new();
        let mut new_roots = Vec::with_capacity(additions.len());
        let mut old_hash_paths = Vec::with_capacity(additions.len());
        let mut new_hash_paths = Vec::with_capacity(additions.len());

        for addition in additions {
            self.check_index(addition.index)?;
            old_hash_paths.push(self.hash_path_with(Some(&overlay), addition.index)?);
            let root = self.write_leaf_path(&mut overlay, addition.index, addition.value)?;
            new_roots.push(root);
            new_hash_paths.push(self.hash_path_with(Some(&overlay), addition.index)?);
        }

        Ok(HashPathsResult {
            old_root: self.root,
            new_roots,
            old_hash_paths,
            new_hash_paths,
        })
    }

    fn apply_sequential(&mut self, index: u64, leaves: &[Hash32]) -> Result<()> {
        if leaves.is_empty() {
            return Ok(());
        }
        let last = index
            .checked_add(leaves.len() as u64 - 1)
            .ok_or(TreeError::IndexOutOfRange { index, capacity: self.capacity() })?;
        self.check_index(last)?;

        let mut overlay = NodeOverlay::new();
        let mut root = self.root;
        for (i, leaf) in leaves.iter().enumerate() {
            root = self.write_leaf_path(&mut overlay, index + i as u64, *leaf)?;
        }
        let size = self.size.max(last + 1);
        self.commit(overlay, root, size)
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.capacity() {
            return Err(TreeError::IndexOutOfRange { index, capacity: self.capacity() });
        }
        Ok(())
    }

    fn read_node(&self, overlay: Option<&NodeOverlay>, id: NodeId) -> Result<Hash32> {
        if let Some(hash) = overlay.and_then(|o| o.get(&id)) {
            return Ok(hash);
        }
        // subtree entirely right of the filled region
        if id.first_leaf() >= self.size {
            return Ok(self.zero_hashes[id.level as usize]);
        }
        match self.storage.get(&node_key(&self.name, id))? {
            Some(bytes) => bytes.as_slice().try_into().map_err(|_| {
                TreeError::Corrupt(format!("node {id:?} has {} bytes", bytes.len()))
            }),
            None => Ok(self.zero_hashes[id.level as usize]),
        }
    }

    fn hash_path_with(&self, overlay: Option<&NodeOverlay>, index: u64) -> Result<HashPath> {
        let mut data = Vec::with_capacity(self.depth as usize);
        for level in 0..self.depth {
            let left = NodeId::new(level as u8, (index >> level) & !1);
            let right = left.sibling();
            data.push((self.read_node(overlay, left)?, self.read_node(overlay, right)?));
        }
        Ok(HashPath::new(data))
    }

    /// Stage a leaf and every ancestor; returns the new root.
    fn write_leaf_path(&self, overlay: &mut NodeOverlay, index: u64, leaf: Hash32) -> Result<Hash32> {
        let id = NodeId::new(0, index);
        overlay.insert(id, leaf);
        self.propagate(overlay, id, leaf)
    }

    fn propagate(&self, overlay: &mut NodeOverlay, mut id: NodeId, mut current: Hash32) -> Result<Hash32> {
        while (id.level as u32) < self.depth {
            let sibling = self.read_node(Some(overlay), id.sibling())?;
            current = if id.is_right() {
                self.hasher.compress(&sibling, &current)
            } else {
                self.hasher.compress(&current, &sibling)
            };
            id = id.parent();
            overlay.insert(id, current);
        }
        Ok(current)
    }

    /// Hash an aligned power-of-two run of leaves into its subtree.
    fn insert_subtree(&self, overlay: &mut NodeOverlay, start: u64, leaves: &[Hash32]) -> (NodeId, Hash32) {
        let mut level = 0u8;
        let mut first = start;
        for (i, leaf) in leaves.iter().enumerate() {
            overlay.insert(NodeId::new(0, first + i as u64), *leaf);
        }

        let mut layer = leaves.to_vec();
        while layer.len() > 1 {
            let next: Vec<Hash32> = layer
                .chunks_exact(2)
                .map(|pair| self.hasher.compress(&pair[0], &pair[1]))
                .collect();
            level += 1;
            first >>= 1;
            for (i, hash) in next.iter().enumerate() {
                overlay.insert(NodeId::new(level, first + i as u64), *hash);
            }
            layer = next;
        }

        (NodeId::new(level, first), layer[0])
    }

    fn commit(&mut self, overlay: NodeOverlay, root: Hash32, size: u64) -> Result<()> {
        let mut batch = overlay.into_batch(&self.name);
        batch.put(meta_key(&self.name), encode_meta(&root, size, self.depth));
        self.storage.write_batch(batch)?;
        self.root = root;
        self.size = size;
        Ok(())
    }
}

fn largest_power_of_two_le(n: u64) -> u64 {
    debug_assert!(n > 0);
    1u64 << (63 - n.leading_zeros())
}

fn encode_meta(root: &Hash32, size: u64, depth: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(META_LEN);
    out.extend_from_slice(root);
    out.extend_from_slice(&size.to_be_bytes());
    out.push(depth as u8);
    out
}

fn decode_meta(bytes: &[u8]) -> Result<(Hash32, u64, u32)> {
    if bytes.len() != META_LEN {
        return Err(TreeError::Corrupt(format!("tree metadata has {} bytes", bytes.len())));
    }
    let mut root = [0u8; 32];
    root.copy_from_slice(&bytes[..32]);
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[32..40]);
    Ok((root, u64::from_be_bytes(size), bytes[40] as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn largest_power_of_two() {
        assert_eq!(largest_power_of_two_le(1), 1);
        assert_eq!(largest_power_of_two_le(3), 2);
        assert_eq!(largest_power_of_two_le(4), 4);
        assert_eq!(largest_power_of_two_le(127), 64);
    }

    #[test]
    fn meta_roundtrip() {
        let root = [7u8; 32];
        let (r, s, d) = decode_meta(&encode_meta(&root, 42, 32)).unwrap();
        assert_eq!((r, s, d), (root, 42, 32));
    }
}
