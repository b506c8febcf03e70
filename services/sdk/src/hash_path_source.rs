//! Where proof construction gets data tree roots and paths from

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tree::{HashPath, HashPathsResult, LeafAddition, TreeState};

use crate::error::{Result, SdkError};
use crate::world_state::WorldState;

/// Tree index of the note data tree. The only tree held client side.
pub const DATA_TREE: u32 = 0;

/// Attempts at reading a snapshot from a source that cannot hold the tree
/// still while it answers.
const SNAPSHOT_ATTEMPTS: usize = 5;

/// Tree state together with hash paths read at that same state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub state: TreeState,
    pub paths: Vec<HashPath>,
}

#[async_trait]
pub trait HashPathSource: Send + Sync {
    async fn get_tree_state(&self, tree: u32) -> Result<TreeState>;
    async fn get_hash_path(&self, tree: u32, index: u64) -> Result<HashPath>;
    /// Paths before and after applying `additions` in order, without
    /// persisting anything.
    async fn get_hash_paths(&self, tree: u32, additions: Vec<LeafAddition>) -> Result<HashPathsResult>;

    /// Root and the paths of `indices` from one version of the tree. The
    /// default reads the state on both sides of the paths and retries while
    /// it moves.
    async fn get_snapshot(&self, tree: u32, indices: Vec<u64>) -> Result<TreeSnapshot> {
        for _ in 0..SNAPSHOT_ATTEMPTS {
            let before = self.get_tree_state(tree).await?;
            let mut paths = Vec::with_capacity(indices.len());
            for &index in &indices {
                paths.push(self.get_hash_path(tree, index).await?);
            }
            if self.get_tree_state(tree).await? == before {
                return Ok(TreeSnapshot { state: before, paths });
            }
        }
        Err(SdkError::InvalidData(format!(
            "tree {tree} kept changing over {SNAPSHOT_ATTEMPTS} snapshot attempts"
        )))
    }
}

#[async_trait]
impl HashPathSource for WorldState {
    async fn get_tree_state(&self, tree: u32) -> Result<TreeState> {
        if tree != DATA_TREE {
            return Err(SdkError::UnknownTree(tree));
        }
        self.consistent_state().await
    }

    async fn get_hash_path(&self, tree: u32, index: u64) -> Result<HashPath> {
        if tree != DATA_TREE {
            return Err(SdkError::UnknownTree(tree));
        }
        WorldState::get_hash_path(self, index)
    }

    async fn get_hash_paths(&self, tree: u32, additions: Vec<LeafAddition>) -> Result<HashPathsResult> {
        if tree != DATA_TREE {
            return Err(SdkError::UnknownTree(tree));
        }
        WorldState::get_hash_paths(self, &additions)
    }

    async fn get_snapshot(&self, tree: u32, indices: Vec<u64>) -> Result<TreeSnapshot> {
        if tree != DATA_TREE {
            return Err(SdkError::UnknownTree(tree));
        }
        self.snapshot(indices).await
    }
}

/// Remote tree service speaking hex JSON.
pub struct HttpHashPathSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHashPathSource {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        resp.json().await.with_context(|| format!("bad response from {url}"))
    }
}

#[async_trait]
impl HashPathSource for HttpHashPathSource {
    async fn get_tree_state(&self, tree: u32) -> Result<TreeState> {
        Ok(self.get_json(&format!("/tree-state/{tree}")).await?)
    }

    async fn get_hash_path(&self, tree: u32, index: u64) -> Result<HashPath> {
        Ok(self.get_json(&format!("/hash-path/{tree}/{index}")).await?)
    }

    async fn get_hash_paths(&self, tree: u32, additions: Vec<LeafAddition>) -> Result<HashPathsResult> {
        let url = format!("{}/hash-paths/{tree}", self.base_url);
        let result: anyhow::Result<HashPathsResult> = async {
            let resp = self.client.post(&url).json(&additions).send().await?.error_for_status()?;
            Ok(resp.json().await?)
        }
        .await;
        Ok(result?)
    }
}
