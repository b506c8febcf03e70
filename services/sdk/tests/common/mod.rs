#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use notes::encoding::u32_word;
use notes::{
    AccountPrivateKey, AccountPublicKey, NoteAlgorithms, SignatureBytes, TreeNote, TxId, UserDataStore, ViewingKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rollup_sdk::block::{Block, DefiInteractionEvent};
use rollup_sdk::core_sdk::CLIENT_VERSION;
use rollup_sdk::proofs::{AccountTx, JoinSplitTx, Prover, ProverError};
use rollup_sdk::provider::{AssetFees, RollupProvider, RollupProviderStatus, Tx};
use rollup_sdk::rollup_proof::{InnerProofData, ProofId, RollupProofData, INNER_PROOF_SIZE};
use rollup_sdk::SharedStorage;
use tree::{Blake3Hasher, Hash32, Hasher, InMemoryStorage};

pub const ROLLUP_SIZE: u32 = 4;

pub fn hasher() -> Arc<dyn Hasher> {
    Arc::new(Blake3Hasher::new())
}

pub fn algos() -> NoteAlgorithms {
    NoteAlgorithms::new(hasher())
}

pub fn storage() -> SharedStorage {
    Arc::new(InMemoryStorage::new())
}

pub fn user_store(storage: &SharedStorage) -> Arc<UserDataStore<SharedStorage>> {
    Arc::new(UserDataStore::new(storage.clone()))
}

pub fn random_hash() -> Hash32 {
    let mut out = [0u8; 32];
    OsRng.fill_bytes(&mut out);
    out
}

pub fn account() -> AccountPrivateKey {
    AccountPrivateKey::random(&mut OsRng)
}

pub fn mined(rollup_id: u32) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + rollup_id as i64 * 1_000).unwrap()
}

/// Block around an already built rollup.
pub fn block_from(rollup: RollupProofData, offchain: Vec<Vec<u8>>, events: Vec<DefiInteractionEvent>) -> Block {
    let rollup_id = rollup.rollup_id;
    Block {
        tx_hash: [rollup_id as u8; 32],
        mined: mined(rollup_id),
        rollup_id,
        rollup_size: rollup.rollup_size,
        rollup_proof_data: rollup.encode(),
        offchain_tx_data: offchain,
        interaction_result: events,
        gas_used: 21_000,
        gas_price: [0u8; 32],
        subtree_root: None,
    }
}

pub fn block(rollup_id: u32, proofs: Vec<InnerProofData>, offchain: Vec<Vec<u8>>) -> Block {
    block_from(RollupProofData::new(rollup_id, ROLLUP_SIZE, proofs), offchain, Vec::new())
}

pub fn empty_block(rollup_id: u32) -> Block {
    block(rollup_id, Vec::new(), Vec::new())
}

pub fn empty_blocks(n: u32) -> Vec<Block> {
    (0..n).map(empty_block).collect()
}

/// A deposit paying `value` to `owner` in output 1. Output 2 carries an
/// undecryptable viewing key.
pub struct Payment {
    pub proof: InnerProofData,
    pub offchain: Vec<u8>,
    pub note: TreeNote,
    pub commitment: Hash32,
}

pub fn payment_to(
    algos: &NoteAlgorithms,
    proof_id: ProofId,
    owner: &AccountPublicKey,
    value: u128,
    asset_id: u32,
    input_nullifiers: [Hash32; 2],
) -> Payment {
    let note = TreeNote::new(*owner, value, asset_id, false, input_nullifiers[0], &mut OsRng);
    let other = TreeNote::new(AccountPublicKey::ZERO, 0, asset_id, false, input_nullifiers[1], &mut OsRng);
    let commitment = algos.value_note_commitment(&note);
    let proof = InnerProofData {
        proof_id,
        note_commitment_1: commitment,
        note_commitment_2: algos.value_note_commitment(&other),
        nullifier_1: input_nullifiers[0],
        nullifier_2: input_nullifiers[1],
        public_value: if proof_id == ProofId::Deposit { value } else { 0 },
        public_owner: [9u8; 32],
        asset_id: u32_word(asset_id),
    };
    let mut offchain = ViewingKey::create(&note.plaintext(), owner, &mut OsRng).unwrap().as_bytes().to_vec();
    offchain.extend_from_slice(ViewingKey::random(&mut OsRng).as_bytes());
    Payment { proof, offchain, note, commitment }
}

pub fn deposit_to(algos: &NoteAlgorithms, owner: &AccountPublicKey, value: u128, asset_id: u32) -> Payment {
    payment_to(algos, ProofId::Deposit, owner, value, asset_id, [random_hash(), random_hash()])
}

/// Rollup provider serving a fixed list of blocks from memory.
pub struct MockProvider {
    pub version: String,
    blocks: Mutex<Vec<Block>>,
    /// Cap on blocks returned per request.
    batch_limit: Option<usize>,
    pub requests: Mutex<Vec<(u32, u32)>>,
    pub sent: Mutex<Vec<Tx>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            version: CLIENT_VERSION.to_string(),
            blocks: Mutex::new(blocks),
            batch_limit: None,
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn push_block(&self, block: Block) {
        self.blocks.lock().unwrap().push(block);
    }

    pub fn get_blocks_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RollupProvider for MockProvider {
    async fn get_status(&self) -> anyhow::Result<RollupProviderStatus> {
        Ok(RollupProviderStatus {
            version: self.version.clone(),
            rollup_size: ROLLUP_SIZE,
            next_rollup_id: self.blocks.lock().unwrap().len() as u32,
            asset_fees: vec![AssetFees {
                asset_id: 0,
                base_fee: 10,
                tx_type_fees: vec![0, 1, 2, 3, 4, 5, 6],
                instant_fee_multiplier: 2,
            }],
        })
    }

    async fn get_blocks(&self, from: u32, take: u32) -> anyhow::Result<Vec<Block>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((from, take));
        let limit = self.batch_limit.unwrap_or(usize::MAX).min(take as usize);
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.rollup_id >= from)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_latest_rollup_id(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.blocks.lock().unwrap().last().map(|b| b.rollup_id))
    }

    async fn send_txs(&self, txs: Vec<Tx>) -> anyhow::Result<Vec<TxId>> {
        let hasher = Blake3Hasher::new();
        let ids = txs
            .iter()
            .map(|tx| {
                let inner = InnerProofData::from_bytes(&tx.proof_data[..INNER_PROOF_SIZE])?;
                Ok(TxId(inner.tx_id(&hasher)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.sent.lock().unwrap().extend(txs);
        Ok(ids)
    }
}

/// Prover that returns a fixed blob and counts calls.
#[derive(Default)]
pub struct MockProver {
    pub calls: AtomicUsize,
}

pub const MOCK_PROOF: [u8; 16] = [0xab; 16];

#[async_trait]
impl Prover for MockProver {
    async fn prove_join_split(&self, _tx: &JoinSplitTx, _sig: &SignatureBytes) -> Result<Vec<u8>, ProverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MOCK_PROOF.to_vec())
    }

    async fn prove_account(&self, _tx: &AccountTx, _sig: &SignatureBytes) -> Result<Vec<u8>, ProverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MOCK_PROOF.to_vec())
    }

    async fn prove_defi_deposit(&self, _tx: &JoinSplitTx, _sig: &SignatureBytes) -> Result<Vec<u8>, ProverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MOCK_PROOF.to_vec())
    }
}
