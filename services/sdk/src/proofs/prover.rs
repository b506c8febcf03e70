use async_trait::async_trait;
use notes::SignatureBytes;
use thiserror::Error;

use super::tx::{AccountTx, JoinSplitTx};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProverError {
    #[error("prover unavailable: {0}")]
    Unavailable(String),

    #[error("proof construction failed: {0}")]
    Failed(String),
}

/// The zk proving system. Opaque: gets a witness, returns proof bytes.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove_join_split(&self, tx: &JoinSplitTx, signature: &SignatureBytes) -> Result<Vec<u8>, ProverError>;
    async fn prove_account(&self, tx: &AccountTx, signature: &SignatureBytes) -> Result<Vec<u8>, ProverError>;
    async fn prove_defi_deposit(&self, tx: &JoinSplitTx, signature: &SignatureBytes)
        -> Result<Vec<u8>, ProverError>;
}
