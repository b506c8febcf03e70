//! Persistent append-optimised Merkle tree
//!
//! Nodes are stored in a flat key-value [`Storage`] under `(name, level, index)`
//! so several named trees can share one backing store. Hash paths come back
//! leaf level first; recomputing them upward with [`Hasher::compress`]
//! reproduces the tree root.

mod error;
mod hasher;
pub mod hex_serde;
mod merkle;
mod nodestore;
mod storage;
mod types;

pub use error::{Result, StorageError, TreeError};
pub use hasher::{compute_zero_hashes, Blake3Hasher, Hasher};
pub use merkle::{MerkleTree, MAX_DEPTH};
pub use nodestore::{meta_key, node_key, NodeId};
pub use storage::{FileBackedStorage, InMemoryStorage, Storage, WriteBatch};
pub use types::{Hash32, HashPath, HashPathsResult, LeafAddition, TreeState};
