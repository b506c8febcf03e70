//! Client-side rollup state: block sync, user note discovery and proof
//! construction on top of the `tree` and `notes` crates.

pub mod block;
pub mod block_context;
pub mod block_downloader;
pub mod config;
pub mod core_sdk;
pub mod error;
pub mod events;
pub mod fifo;
pub mod hash_path_source;
pub mod lock;
pub mod proofs;
pub mod provider;
pub mod provider_http;
pub mod rollup_proof;
pub mod serial_queue;
pub mod sleep;
pub mod transport;
pub mod user_state;
pub mod world_state;

use std::sync::Arc;

/// Storage handle shared by the world state, user store and locks.
pub type SharedStorage = Arc<dyn tree::Storage>;

pub use error::{Result, SdkError};
