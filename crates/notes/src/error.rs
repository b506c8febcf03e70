use thiserror::Error;

use crate::user_tx::DefiInteractionState;

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid DeFi transition from {from:?} on {event}")]
    InvalidTransition {
        from: DefiInteractionState,
        event: &'static str,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] tree::StorageError),

    #[error("Serialization error: {0}")]
    Ser(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, NotesError>;
