use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage: {0}")]
    Corrupt(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Index {index} out of range for tree of capacity {capacity}")]
    IndexOutOfRange { index: u64, capacity: u64 },

    #[error("Invalid tree depth {0}")]
    InvalidDepth(u32),

    #[error("Invalid insertion: {0}")]
    InvalidInsertion(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupt tree data: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;
