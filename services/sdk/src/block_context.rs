use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tree::{Hash32, HashPath, Hasher, InMemoryStorage, MerkleTree};

use crate::block::Block;
use crate::error::{Result, SdkError};
use crate::rollup_proof::RollupProofData;

/// A settled block plus its decoded rollup proof, shared by every consumer
/// of one sync batch.
///
/// The block's own note subtree is built on first use and at most once, no
/// matter how many users ask for paths concurrently.
pub struct BlockContext {
    block: Block,
    rollup: RollupProofData,
    leaf_range: (u64, u64),
    hasher: Arc<dyn Hasher>,
    subtree: OnceCell<MerkleTree<InMemoryStorage>>,
    builds: AtomicUsize,
}

impl BlockContext {
    pub fn from_block(block: Block, hasher: Arc<dyn Hasher>) -> Result<Self> {
        let rollup = RollupProofData::decode(&block.rollup_proof_data)?;
        if rollup.rollup_id != block.rollup_id {
            return Err(SdkError::InvalidData(format!(
                "block {} carries proof data for rollup {}",
                block.rollup_id, rollup.rollup_id
            )));
        }
        if rollup.rollup_size != block.rollup_size {
            return Err(SdkError::InvalidData(format!(
                "block {} claims rollup size {} but its proof data has {}",
                block.rollup_id, block.rollup_size, rollup.rollup_size
            )));
        }
        let leaf_range = rollup.leaf_range()?;
        Ok(Self {
            block,
            rollup,
            leaf_range,
            hasher,
            subtree: OnceCell::new(),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn rollup(&self) -> &RollupProofData {
        &self.rollup
    }

    pub fn rollup_id(&self) -> u32 {
        self.block.rollup_id
    }

    pub fn hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    /// `[start, end)` of the data tree leaves this block fills.
    pub fn leaf_range(&self) -> (u64, u64) {
        self.leaf_range
    }

    pub fn note_commitments(&self) -> Vec<Hash32> {
        self.rollup.note_commitments()
    }

    /// Number of times the subtree has been built. Never more than one.
    pub fn subtree_builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Path of the note at global leaf `index` within this block's subtree.
    pub async fn get_block_subtree_hash_path(&self, index: u64) -> Result<HashPath> {
        let (start, end) = self.leaf_range();
        if index < start || index >= end {
            return Err(SdkError::IndexOutOfBounds { index, start, end });
        }
        let subtree = self.subtree.get_or_try_init(|| async { self.build_subtree() }).await?;
        Ok(subtree.get_hash_path(index - start)?)
    }

    fn build_subtree(&self) -> Result<MerkleTree<InMemoryStorage>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let leaves = self.note_commitments();
        let capacity = (leaves.len() as u64).next_power_of_two().max(2);
        let mut tree = MerkleTree::new(
            InMemoryStorage::new(),
            self.hasher.clone(),
            format!("block-{}", self.block.rollup_id),
            capacity.trailing_zeros(),
        )?;
        tree.update_leaf_hashes(0, &leaves)?;
        Ok(tree)
    }
}
