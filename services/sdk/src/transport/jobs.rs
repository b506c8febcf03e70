use std::sync::Arc;

use async_trait::async_trait;
use notes::{SignatureBytes, SIGNATURE_SIZE};
use serde::{Deserialize, Serialize};
use tree::{HashPath, HashPathsResult, LeafAddition, TreeState};

use super::client::TransportClient;
use super::TransportError;
use crate::error::{Result, SdkError};
use crate::hash_path_source::HashPathSource;
use crate::proofs::{AccountTx, JoinSplitTx, Prover, ProverError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fn", content = "args", rename_all = "snake_case")]
pub enum JobRequest {
    ProveJoinSplit {
        tx: JoinSplitTx,
        #[serde(with = "hex::serde")]
        signature: Vec<u8>,
    },
    ProveAccount {
        tx: AccountTx,
        #[serde(with = "hex::serde")]
        signature: Vec<u8>,
    },
    ProveDefiDeposit {
        tx: JoinSplitTx,
        #[serde(with = "hex::serde")]
        signature: Vec<u8>,
    },
    GetTreeState {
        tree: u32,
    },
    GetHashPath {
        tree: u32,
        index: u64,
    },
    GetHashPaths {
        tree: u32,
        additions: Vec<LeafAddition>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobResponse {
    Proof(#[serde(with = "hex::serde")] Vec<u8>),
    TreeState(TreeState),
    HashPath(HashPath),
    HashPaths(HashPathsResult),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub msg_id: u64,
    pub payload: JobRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub msg_id: u64,
    pub result: std::result::Result<JobResponse, String>,
}

/// Server side of the job protocol.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, request: JobRequest) -> Result<JobResponse>;
}

fn signature(bytes: &[u8]) -> Result<SignatureBytes> {
    bytes
        .try_into()
        .map_err(|_| SdkError::InvalidData(format!("signature must be {SIGNATURE_SIZE} bytes, got {}", bytes.len())))
}

/// Serves proofs from a local prover and paths from a local tree.
pub struct SdkJobHandler {
    prover: Option<Arc<dyn Prover>>,
    hash_paths: Arc<dyn HashPathSource>,
}

impl SdkJobHandler {
    pub fn new(prover: Option<Arc<dyn Prover>>, hash_paths: Arc<dyn HashPathSource>) -> Self {
        Self { prover, hash_paths }
    }

    fn prover(&self) -> Result<&dyn Prover> {
        self.prover
            .as_deref()
            .ok_or_else(|| ProverError::Unavailable("this worker has no prover".into()).into())
    }
}

#[async_trait]
impl JobHandler for SdkJobHandler {
    async fn handle(&self, request: JobRequest) -> Result<JobResponse> {
        Ok(match request {
            JobRequest::ProveJoinSplit { tx, signature: sig } => {
                JobResponse::Proof(self.prover()?.prove_join_split(&tx, &signature(&sig)?).await?)
            }
            JobRequest::ProveAccount { tx, signature: sig } => {
                JobResponse::Proof(self.prover()?.prove_account(&tx, &signature(&sig)?).await?)
            }
            JobRequest::ProveDefiDeposit { tx, signature: sig } => {
                JobResponse::Proof(self.prover()?.prove_defi_deposit(&tx, &signature(&sig)?).await?)
            }
            JobRequest::GetTreeState { tree } => JobResponse::TreeState(self.hash_paths.get_tree_state(tree).await?),
            JobRequest::GetHashPath { tree, index } => {
                JobResponse::HashPath(self.hash_paths.get_hash_path(tree, index).await?)
            }
            JobRequest::GetHashPaths { tree, additions } => {
                JobResponse::HashPaths(self.hash_paths.get_hash_paths(tree, additions).await?)
            }
        })
    }
}

fn unexpected(response: &JobResponse) -> String {
    format!("unexpected response {response:?}")
}

/// [`Prover`] that forwards every job over a transport.
pub struct RemoteProver {
    client: Arc<TransportClient>,
}

impl RemoteProver {
    pub fn new(client: Arc<TransportClient>) -> Self {
        Self { client }
    }

    async fn prove(&self, request: JobRequest) -> std::result::Result<Vec<u8>, ProverError> {
        match self.client.request(request).await {
            Ok(JobResponse::Proof(bytes)) => Ok(bytes),
            Ok(other) => Err(ProverError::Failed(unexpected(&other))),
            Err(TransportError::Remote(msg)) => Err(ProverError::Failed(msg)),
            Err(e) => Err(ProverError::Unavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl Prover for RemoteProver {
    async fn prove_join_split(
        &self,
        tx: &JoinSplitTx,
        signature: &SignatureBytes,
    ) -> std::result::Result<Vec<u8>, ProverError> {
        self.prove(JobRequest::ProveJoinSplit { tx: tx.clone(), signature: signature.to_vec() }).await
    }

    async fn prove_account(
        &self,
        tx: &AccountTx,
        signature: &SignatureBytes,
    ) -> std::result::Result<Vec<u8>, ProverError> {
        self.prove(JobRequest::ProveAccount { tx: tx.clone(), signature: signature.to_vec() }).await
    }

    async fn prove_defi_deposit(
        &self,
        tx: &JoinSplitTx,
        signature: &SignatureBytes,
    ) -> std::result::Result<Vec<u8>, ProverError> {
        self.prove(JobRequest::ProveDefiDeposit { tx: tx.clone(), signature: signature.to_vec() }).await
    }
}

/// [`HashPathSource`] answered by a remote [`SdkJobHandler`].
pub struct TransportHashPathSource {
    client: Arc<TransportClient>,
}

impl TransportHashPathSource {
    pub fn new(client: Arc<TransportClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HashPathSource for TransportHashPathSource {
    async fn get_tree_state(&self, tree: u32) -> Result<TreeState> {
        match self.client.request(JobRequest::GetTreeState { tree }).await? {
            JobResponse::TreeState(state) => Ok(state),
            other => Err(SdkError::InvalidData(unexpected(&other))),
        }
    }

    async fn get_hash_path(&self, tree: u32, index: u64) -> Result<HashPath> {
        match self.client.request(JobRequest::GetHashPath { tree, index }).await? {
            JobResponse::HashPath(path) => Ok(path),
            other => Err(SdkError::InvalidData(unexpected(&other))),
        }
    }

    async fn get_hash_paths(&self, tree: u32, additions: Vec<LeafAddition>) -> Result<HashPathsResult> {
        match self.client.request(JobRequest::GetHashPaths { tree, additions }).await? {
            JobResponse::HashPaths(paths) => Ok(paths),
            other => Err(SdkError::InvalidData(unexpected(&other))),
        }
    }
}
