//! Public data of a rollup proof
//!
//! Everything is a sequence of 32-byte big-endian words: a fixed header
//! followed by `rollup_size` inner-proof records of eight words each.

use notes::encoding::{u128_word, u32_word, u64_word, word_u128, word_u32, word_u64, Word, WORD_SIZE};
use notes::BridgeCallData;
use serde::{Deserialize, Serialize};
use tree::{Hash32, Hasher};

use crate::error::{Result, SdkError};

pub const NUM_BRIDGE_CALLS_PER_BLOCK: usize = 32;
pub const NUM_ASSETS: usize = 16;
pub const OUTPUT_NOTES_PER_TX: u64 = 2;

/// Words before the first bridge call data.
const FIXED_HEADER_WORDS: usize = 11;
pub const HEADER_WORDS: usize = FIXED_HEADER_WORDS
    + NUM_BRIDGE_CALLS_PER_BLOCK * 2
    + NUM_ASSETS * 2
    + NUM_BRIDGE_CALLS_PER_BLOCK
    + 3;
pub const INNER_PROOF_WORDS: usize = 8;
pub const INNER_PROOF_SIZE: usize = INNER_PROOF_WORDS * WORD_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofId {
    Padding = 0,
    Deposit = 1,
    Withdraw = 2,
    Send = 3,
    Account = 4,
    DefiDeposit = 5,
    DefiClaim = 6,
}

impl ProofId {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => ProofId::Padding,
            1 => ProofId::Deposit,
            2 => ProofId::Withdraw,
            3 => ProofId::Send,
            4 => ProofId::Account,
            5 => ProofId::DefiDeposit,
            6 => ProofId::DefiClaim,
            _ => return None,
        })
    }

    /// Join-splits whose offchain data carries a viewing key per output.
    pub fn is_payment(&self) -> bool {
        matches!(self, ProofId::Deposit | ProofId::Withdraw | ProofId::Send)
    }
}

/// Public inputs of one user proof.
///
/// `asset_id` is kept as a raw word: DeFi deposits put their bridge call
/// data there instead of an asset id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerProofData {
    pub proof_id: ProofId,
    pub note_commitment_1: Hash32,
    pub note_commitment_2: Hash32,
    pub nullifier_1: Hash32,
    pub nullifier_2: Hash32,
    pub public_value: u128,
    pub public_owner: Hash32,
    pub asset_id: Word,
}

impl InnerProofData {
    pub fn padding() -> Self {
        Self {
            proof_id: ProofId::Padding,
            note_commitment_1: [0u8; 32],
            note_commitment_2: [0u8; 32],
            nullifier_1: [0u8; 32],
            nullifier_2: [0u8; 32],
            public_value: 0,
            public_owner: [0u8; 32],
            asset_id: [0u8; 32],
        }
    }

    pub fn is_padding(&self) -> bool {
        self.proof_id == ProofId::Padding
    }

    pub fn asset_id_u32(&self) -> Option<u32> {
        word_u32(&self.asset_id)
    }

    pub fn bridge_call_data(&self) -> BridgeCallData {
        BridgeCallData::from_word(&self.asset_id)
    }

    pub fn nullifiers(&self) -> [Hash32; 2] {
        [self.nullifier_1, self.nullifier_2]
    }

    pub fn to_bytes(&self) -> [u8; INNER_PROOF_SIZE] {
        let words = [
            u32_word(self.proof_id as u32),
            self.note_commitment_1,
            self.note_commitment_2,
            self.nullifier_1,
            self.nullifier_2,
            u128_word(self.public_value),
            self.public_owner,
            self.asset_id,
        ];
        let mut out = [0u8; INNER_PROOF_SIZE];
        for (i, w) in words.iter().enumerate() {
            out[i * WORD_SIZE..(i + 1) * WORD_SIZE].copy_from_slice(w);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INNER_PROOF_SIZE {
            return Err(SdkError::InvalidData(format!(
                "inner proof needs {INNER_PROOF_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let w = |i: usize| word_at(bytes, i);
        let proof_id = word_u32(&w(0))
            .and_then(ProofId::from_u32)
            .ok_or_else(|| SdkError::InvalidData("unknown proof id".into()))?;
        let public_value =
            word_u128(&w(5)).ok_or_else(|| SdkError::InvalidData("public value overflows u128".into()))?;
        Ok(Self {
            proof_id,
            note_commitment_1: w(1),
            note_commitment_2: w(2),
            nullifier_1: w(3),
            nullifier_2: w(4),
            public_value,
            public_owner: w(6),
            asset_id: w(7),
        })
    }

    /// Transaction id: hash of the encoded record.
    pub fn tx_id(&self, hasher: &dyn Hasher) -> Hash32 {
        hasher.hash_to_field(&self.to_bytes())
    }
}

fn word_at(bytes: &[u8], i: usize) -> Word {
    let mut w = [0u8; WORD_SIZE];
    w.copy_from_slice(&bytes[i * WORD_SIZE..(i + 1) * WORD_SIZE]);
    w
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollupProofData {
    pub rollup_id: u32,
    pub rollup_size: u32,
    pub data_start_index: u64,
    pub old_data_root: Hash32,
    pub new_data_root: Hash32,
    pub old_null_root: Hash32,
    pub new_null_root: Hash32,
    pub old_data_roots_root: Hash32,
    pub new_data_roots_root: Hash32,
    pub old_defi_root: Hash32,
    pub new_defi_root: Hash32,
    pub bridge_call_datas: Vec<BridgeCallData>,
    pub deposit_sums: Vec<u128>,
    pub asset_ids: Vec<u32>,
    pub total_tx_fees: Vec<u128>,
    pub defi_interaction_notes: Vec<Hash32>,
    pub prev_defi_interaction_hash: Hash32,
    pub rollup_beneficiary: Hash32,
    pub num_txs: u32,
    pub inner_proofs: Vec<InnerProofData>,
}

impl RollupProofData {
    /// Rollup with zeroed roots; `inner_proofs` is padded to `rollup_size`.
    /// The data start index follows from the id as every rollup fills
    /// `rollup_size * 2` leaves.
    pub fn new(rollup_id: u32, rollup_size: u32, mut inner_proofs: Vec<InnerProofData>) -> Self {
        let num_txs = inner_proofs.iter().filter(|p| !p.is_padding()).count() as u32;
        inner_proofs.resize(rollup_size as usize, InnerProofData::padding());
        Self {
            rollup_id,
            rollup_size,
            data_start_index: rollup_id as u64 * rollup_size as u64 * OUTPUT_NOTES_PER_TX,
            old_data_root: [0u8; 32],
            new_data_root: [0u8; 32],
            old_null_root: [0u8; 32],
            new_null_root: [0u8; 32],
            old_data_roots_root: [0u8; 32],
            new_data_roots_root: [0u8; 32],
            old_defi_root: [0u8; 32],
            new_defi_root: [0u8; 32],
            bridge_call_datas: vec![BridgeCallData::default(); NUM_BRIDGE_CALLS_PER_BLOCK],
            deposit_sums: vec![0; NUM_BRIDGE_CALLS_PER_BLOCK],
            asset_ids: vec![0; NUM_ASSETS],
            total_tx_fees: vec![0; NUM_ASSETS],
            defi_interaction_notes: vec![[0u8; 32]; NUM_BRIDGE_CALLS_PER_BLOCK],
            prev_defi_interaction_hash: [0u8; 32],
            rollup_beneficiary: [0u8; 32],
            num_txs,
            inner_proofs,
        }
    }

    /// Every output commitment of the rollup in leaf order, padding included.
    pub fn note_commitments(&self) -> Vec<Hash32> {
        self.inner_proofs
            .iter()
            .flat_map(|p| [p.note_commitment_1, p.note_commitment_2])
            .collect()
    }

    /// Interaction nonce the rollup assigns to a deposit into `bridge`.
    pub fn interaction_nonce(&self, bridge: &BridgeCallData) -> Result<u32> {
        let word = bridge.to_word();
        let slot = self
            .bridge_call_datas
            .iter()
            .position(|b| b.to_word() == word)
            .ok_or_else(|| SdkError::InvalidData(format!("rollup {} has no slot for the bridge", self.rollup_id)))?;
        self.rollup_id
            .checked_mul(NUM_BRIDGE_CALLS_PER_BLOCK as u32)
            .and_then(|base| base.checked_add(slot as u32))
            .ok_or_else(|| SdkError::InvalidData(format!("interaction nonces of rollup {} overflow u32", self.rollup_id)))
    }

    /// `[start, end)` of the data tree leaves the rollup fills.
    pub fn leaf_range(&self) -> Result<(u64, u64)> {
        let end = (self.rollup_size as u64)
            .checked_mul(OUTPUT_NOTES_PER_TX)
            .and_then(|len| self.data_start_index.checked_add(len))
            .ok_or_else(|| {
                SdkError::InvalidData(format!(
                    "rollup {} leaves overflow: start {} size {}",
                    self.rollup_id, self.data_start_index, self.rollup_size
                ))
            })?;
        Ok((self.data_start_index, end))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut words: Vec<Word> = Vec::with_capacity(HEADER_WORDS + self.inner_proofs.len() * INNER_PROOF_WORDS);
        words.push(u32_word(self.rollup_id));
        words.push(u32_word(self.rollup_size));
        words.push(u64_word(self.data_start_index));
        words.extend([
            self.old_data_root,
            self.new_data_root,
            self.old_null_root,
            self.new_null_root,
            self.old_data_roots_root,
            self.new_data_roots_root,
            self.old_defi_root,
            self.new_defi_root,
        ]);
        words.extend(padded(self.bridge_call_datas.iter().map(|b| b.to_word()), NUM_BRIDGE_CALLS_PER_BLOCK));
        words.extend(padded(self.deposit_sums.iter().map(|v| u128_word(*v)), NUM_BRIDGE_CALLS_PER_BLOCK));
        words.extend(padded(self.asset_ids.iter().map(|v| u32_word(*v)), NUM_ASSETS));
        words.extend(padded(self.total_tx_fees.iter().map(|v| u128_word(*v)), NUM_ASSETS));
        words.extend(padded(self.defi_interaction_notes.iter().copied(), NUM_BRIDGE_CALLS_PER_BLOCK));
        words.push(self.prev_defi_interaction_hash);
        words.push(self.rollup_beneficiary);
        words.push(u32_word(self.num_txs));

        let mut out = words.concat();
        for p in &self.inner_proofs {
            out.extend_from_slice(&p.to_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header_len = HEADER_WORDS * WORD_SIZE;
        if bytes.len() < header_len {
            return Err(SdkError::InvalidData(format!(
                "rollup proof data needs a {header_len} byte header, got {}",
                bytes.len()
            )));
        }
        let w = |i: usize| word_at(bytes, i);
        let int = |i: usize, what: &str| {
            word_u32(&w(i)).ok_or_else(|| SdkError::InvalidData(format!("{what} overflows u32")))
        };
        let value = |i: usize| {
            word_u128(&w(i)).ok_or_else(|| SdkError::InvalidData(format!("header word {i} overflows u128")))
        };

        let rollup_id = int(0, "rollup id")?;
        let rollup_size = int(1, "rollup size")?;
        let data_start_index =
            word_u64(&w(2)).ok_or_else(|| SdkError::InvalidData("data start index overflows u64".into()))?;

        let mut at = FIXED_HEADER_WORDS;
        let bridge_call_datas = (at..at + NUM_BRIDGE_CALLS_PER_BLOCK)
            .map(|i| BridgeCallData::from_word(&w(i)))
            .collect();
        at += NUM_BRIDGE_CALLS_PER_BLOCK;
        let deposit_sums = (at..at + NUM_BRIDGE_CALLS_PER_BLOCK).map(value).collect::<Result<_>>()?;
        at += NUM_BRIDGE_CALLS_PER_BLOCK;
        let asset_ids = (at..at + NUM_ASSETS).map(|i| int(i, "asset id")).collect::<Result<_>>()?;
        at += NUM_ASSETS;
        let total_tx_fees = (at..at + NUM_ASSETS).map(value).collect::<Result<_>>()?;
        at += NUM_ASSETS;
        let defi_interaction_notes = (at..at + NUM_BRIDGE_CALLS_PER_BLOCK).map(w).collect();
        at += NUM_BRIDGE_CALLS_PER_BLOCK;
        let prev_defi_interaction_hash = w(at);
        let rollup_beneficiary = w(at + 1);
        let num_txs = int(at + 2, "num txs")?;

        let body = &bytes[header_len..];
        let expected = rollup_size as usize * INNER_PROOF_SIZE;
        if body.len() != expected {
            return Err(SdkError::InvalidData(format!(
                "rollup of size {rollup_size} needs {expected} bytes of inner proofs, got {}",
                body.len()
            )));
        }
        let inner_proofs = body
            .chunks_exact(INNER_PROOF_SIZE)
            .map(InnerProofData::from_bytes)
            .collect::<Result<_>>()?;

        let rollup = Self {
            rollup_id,
            rollup_size,
            data_start_index,
            old_data_root: w(3),
            new_data_root: w(4),
            old_null_root: w(5),
            new_null_root: w(6),
            old_data_roots_root: w(7),
            new_data_roots_root: w(8),
            old_defi_root: w(9),
            new_defi_root: w(10),
            bridge_call_datas,
            deposit_sums,
            asset_ids,
            total_tx_fees,
            defi_interaction_notes,
            prev_defi_interaction_hash,
            rollup_beneficiary,
            num_txs,
            inner_proofs,
        };
        rollup.leaf_range()?;
        if rollup.rollup_id.checked_mul(NUM_BRIDGE_CALLS_PER_BLOCK as u32).is_none() {
            return Err(SdkError::InvalidData(format!("rollup id {rollup_id} too large for interaction nonces")));
        }
        Ok(rollup)
    }
}

fn padded(words: impl Iterator<Item = Word>, n: usize) -> impl Iterator<Item = Word> {
    words.chain(std::iter::repeat([0u8; WORD_SIZE])).take(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_fixed() {
        assert_eq!(HEADER_WORDS, 142);
        let rollup = RollupProofData::new(3, 4, vec![]);
        assert_eq!(rollup.encode().len(), (142 + 4 * 8) * 32);
        assert_eq!(rollup.data_start_index, 24);
    }

    #[test]
    fn rejects_ids_and_ranges_that_overflow() {
        let mut rollup = RollupProofData::new(0, 4, vec![]);
        rollup.rollup_id = u32::MAX / 2;
        let err = RollupProofData::decode(&rollup.encode()).unwrap_err();
        assert!(matches!(err, SdkError::InvalidData(msg) if msg.contains("interaction nonces")));
        assert!(rollup.interaction_nonce(&BridgeCallData::default()).is_err());

        let mut rollup = RollupProofData::new(1, 4, vec![]);
        rollup.data_start_index = u64::MAX - 3;
        assert!(rollup.leaf_range().is_err());
        let err = RollupProofData::decode(&rollup.encode()).unwrap_err();
        assert!(matches!(err, SdkError::InvalidData(msg) if msg.contains("leaves overflow")));

        let rollup = RollupProofData::new(2, 4, vec![]);
        assert_eq!(rollup.interaction_nonce(&BridgeCallData::default()).unwrap(), 64);
        assert_eq!(rollup.leaf_range().unwrap(), (16, 24));
    }

    #[test]
    fn rejects_unknown_proof_id() {
        let mut bytes = InnerProofData::padding().to_bytes();
        bytes[31] = 9;
        assert!(InnerProofData::from_bytes(&bytes).is_err());
    }
}
