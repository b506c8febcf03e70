//! Local copy of the rollup's data tree
//!
//! All writes go through one serial queue, so blocks are applied strictly in
//! rollup order and never interleave. With a lease-holding queue the tree is
//! re-read from storage at the start of every item, so several processes can
//! share one store. Plain reads take the lock directly and may see the state
//! between two blocks; [`WorldState::snapshot`] never does.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use tree::{Hash32, HashPath, HashPathsResult, Hasher, LeafAddition, MerkleTree, TreeState};

use crate::block_context::BlockContext;
use crate::error::{Result, SdkError};
use crate::hash_path_source::TreeSnapshot;
use crate::serial_queue::AnySerialQueue;
use crate::SharedStorage;

pub const DATA_TREE_NAME: &str = "data";
pub const DATA_TREE_DEPTH: u32 = 32;

const SYNCED_ROLLUP_KEY: &[u8] = b"world:synced-rollup";

struct Inner {
    tree: RwLock<MerkleTree<SharedStorage>>,
    storage: SharedStorage,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, MerkleTree<SharedStorage>> {
        match self.tree.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, MerkleTree<SharedStorage>> {
        match self.tree.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn synced_to_rollup(&self) -> Result<Option<u32>> {
        match self.storage.get(SYNCED_ROLLUP_KEY)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| SdkError::InvalidData("synced rollup id must be 4 bytes".into()))?;
                Ok(Some(u32::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Apply blocks newer than the synced point. Returns the new synced id.
    fn apply(&self, blocks: &[Arc<BlockContext>]) -> Result<Option<u32>> {
        let mut tree = self.write();
        // another process may have advanced the tree since our last item
        tree.reload()?;
        let mut synced = self.synced_to_rollup()?;
        for ctx in blocks {
            let rollup_id = ctx.rollup_id();
            let expected = synced.map_or(0, |s| s + 1);
            if rollup_id < expected {
                debug!(rollup_id, "world state: block already applied");
                continue;
            }
            if rollup_id > expected {
                return Err(SdkError::InvalidData(format!(
                    "world state expected rollup {expected}, got {rollup_id}"
                )));
            }
            let (start, end) = ctx.leaf_range();
            // leaves may already be in from a run that died before the id was saved
            if tree.size() < end {
                let leaves = ctx.note_commitments();
                check_new_root(&tree, ctx, start, &leaves)?;
                tree.update_leaf_hashes(start, &leaves)?;
            }
            self.storage.put(SYNCED_ROLLUP_KEY, &rollup_id.to_be_bytes())?;
            synced = Some(rollup_id);
        }
        Ok(synced)
    }
}

/// Compare the root the block's leaves would produce with the root the
/// rollup commits to, before anything is written. Rollups that carry no data
/// root (all zero) are taken as they are.
fn check_new_root(
    tree: &MerkleTree<SharedStorage>,
    ctx: &BlockContext,
    start: u64,
    leaves: &[Hash32],
) -> Result<()> {
    let expected = ctx.rollup().new_data_root;
    if expected == [0u8; 32] {
        return Ok(());
    }
    let additions: Vec<LeafAddition> = leaves
        .iter()
        .zip(start..)
        .map(|(value, index)| LeafAddition { index, value: *value })
        .collect();
    let root = tree.get_hash_paths(&additions)?.new_roots.last().copied().unwrap_or_else(|| tree.root());
    if root != expected {
        return Err(SdkError::InvalidData(format!(
            "rollup {} commits to data root {} but its notes give {}",
            ctx.rollup_id(),
            hex::encode(expected),
            hex::encode(root)
        )));
    }
    Ok(())
}

pub struct WorldState {
    inner: Arc<Inner>,
    queue: AnySerialQueue,
}

impl WorldState {
    /// Open (or create) the data tree on `storage`. Must run inside a tokio
    /// runtime because the write queue spawns its worker.
    pub fn new(storage: SharedStorage, hasher: Arc<dyn Hasher>, queue: AnySerialQueue) -> Result<Self> {
        let tree = MerkleTree::open(storage.clone(), hasher, DATA_TREE_NAME, DATA_TREE_DEPTH)?;
        info!(size = tree.size(), root = %hex::encode(tree.root()), "world state: opened");
        Ok(Self {
            inner: Arc::new(Inner { tree: RwLock::new(tree), storage }),
            queue,
        })
    }

    pub fn root(&self) -> Hash32 {
        self.inner.read().root()
    }

    pub fn size(&self) -> u64 {
        self.inner.read().size()
    }

    pub fn state(&self) -> TreeState {
        self.inner.read().state()
    }

    pub fn synced_to_rollup(&self) -> Result<Option<u32>> {
        self.inner.synced_to_rollup()
    }

    pub fn get_hash_path(&self, index: u64) -> Result<HashPath> {
        Ok(self.inner.read().get_hash_path(index)?)
    }

    pub fn get_hash_paths(&self, additions: &[LeafAddition]) -> Result<HashPathsResult> {
        Ok(self.inner.read().get_hash_paths(additions)?)
    }

    /// Insert the note commitments of `blocks` in rollup order, skipping
    /// blocks already applied. A gap in rollup ids is an error.
    pub async fn apply_blocks(&self, blocks: Vec<Arc<BlockContext>>) -> Result<Option<u32>> {
        let inner = self.inner.clone();
        let synced = self.queue.push(move || async move { inner.apply(&blocks) }).await??;
        if let Some(id) = synced {
            debug!(rollup_id = id, size = self.size(), "world state: synced");
        }
        Ok(synced)
    }

    /// Snapshot taken inside the write queue, so it never falls between
    /// two halves of a block.
    pub async fn consistent_state(&self) -> Result<TreeState> {
        Ok(self.snapshot(Vec::new()).await?.state)
    }

    /// Root, size and the paths of `indices`, all read in one queue item.
    pub async fn snapshot(&self, indices: Vec<u64>) -> Result<TreeSnapshot> {
        let inner = self.inner.clone();
        self.queue
            .push(move || async move {
                let mut data = inner.write();
                data.reload()?;
                let paths = indices.iter().map(|&i| data.get_hash_path(i)).collect::<tree::Result<Vec<_>>>()?;
                Ok::<_, SdkError>(TreeSnapshot { state: data.state(), paths })
            })
            .await?
    }

    pub async fn destroy(&self) {
        self.queue.destroy().await;
    }
}
