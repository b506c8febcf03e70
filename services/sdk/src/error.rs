use notes::AccountPublicKey;
use thiserror::Error;

use crate::proofs::ProverError;
use crate::serial_queue::QueueError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Tree error: {0}")]
    Tree(#[from] tree::TreeError),

    #[error("Storage error: {0}")]
    Storage(#[from] tree::StorageError),

    #[error("Notes error: {0}")]
    Notes(#[from] notes::NotesError),

    #[error("Auth db error: {0}")]
    AuthDb(#[from] authdb::AuthDbError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Index {index} outside block range [{start}, {end})")]
    IndexOutOfBounds { index: u64, start: u64, end: u64 },

    #[error("Insufficient notes for asset {asset_id}: need {required}, spendable {available}")]
    InsufficientNotes {
        asset_id: u32,
        required: u128,
        available: u128,
    },

    #[error("Version mismatch: client {client}, server {server}")]
    VersionMismatch { client: String, server: String },

    #[error("Unknown user {0}")]
    UnknownUser(AccountPublicKey),

    #[error("Unknown tree {0}")]
    UnknownTree(u32),

    #[error("No fee schedule for asset {0}")]
    UnsupportedAsset(u32),

    #[error("Lock database error: {0}")]
    LockDb(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Prover error: {0}")]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),

    #[error("Task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, SdkError>;
