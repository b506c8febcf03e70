//! Transaction descriptors handed to the prover and the artifacts around them

use notes::{
    AccountPublicKey, BridgeCallData, ClaimTx, CoreUserTx, Note, PaymentKind, TreeClaimNote, TreeNote, TxId,
    ViewingKey,
};
use serde::{Deserialize, Serialize};
use tree::{Hash32, HashPath};

use crate::rollup_proof::{InnerProofData, ProofId};

/// Private witness of a payment or DeFi deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSplitTx {
    pub proof_id: ProofId,
    pub public_value: u128,
    pub public_owner: Option<Hash32>,
    pub asset_id: u32,
    /// Real inputs; the rest of `input_notes` is zero-value padding.
    pub num_input_notes: usize,
    pub input_notes: [TreeNote; 2],
    /// Leaf index of each input. Zero for padding and unsettled notes.
    pub input_indices: [u64; 2],
    pub input_paths: [HashPath; 2],
    pub input_nullifiers: [Hash32; 2],
    pub output_notes: [TreeNote; 2],
    pub claim_note: Option<TreeClaimNote>,
    pub bridge_call_data: Option<BridgeCallData>,
    pub merkle_root: Hash32,
    pub fee: u128,
    /// Change output may be spent before it settles.
    pub allow_chain: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTx {
    pub merkle_root: Hash32,
    pub account_public_key: AccountPublicKey,
    pub new_account_public_key: AccountPublicKey,
    pub alias_hash: Hash32,
    pub create: bool,
    pub migrate: bool,
    pub new_spending_public_key_1: Option<AccountPublicKey>,
    pub new_spending_public_key_2: Option<AccountPublicKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofTx {
    JoinSplit(JoinSplitTx),
    Account(AccountTx),
}

/// What a user asks for when moving value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSpec {
    pub kind: PaymentKind,
    pub asset_id: u32,
    /// Value entering from L1 (deposits).
    pub public_input: u128,
    /// Value leaving to L1 (withdrawals).
    pub public_output: u128,
    pub public_owner: Option<Hash32>,
    /// Defaults to the sender.
    pub recipient: Option<AccountPublicKey>,
    pub recipient_private_output: u128,
    pub recipient_account_required: bool,
    pub sender_private_output: u128,
    pub fee: u128,
    pub allow_chain: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSpec {
    pub alias: String,
    /// Register the alias for the first time.
    pub create: bool,
    /// Move the alias to `new_account_public_key`.
    pub migrate: bool,
    pub new_account_public_key: Option<AccountPublicKey>,
    pub new_spending_public_key_1: Option<AccountPublicKey>,
    pub new_spending_public_key_2: Option<AccountPublicKey>,
    pub fee: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefiSpec {
    pub bridge_call_data: BridgeCallData,
    pub deposit_value: u128,
    pub fee: u128,
}

/// Everything needed to prove, sign and later record one transaction.
#[derive(Clone, Debug)]
pub struct ProofInput {
    pub tx: ProofTx,
    /// Public record the proof commits to.
    pub inner: InnerProofData,
    pub tx_id: TxId,
    /// Bytes the owner signs.
    pub signing_data: Hash32,
    pub viewing_keys: Vec<ViewingKey>,
    pub user_tx: CoreUserTx,
    /// Outputs we own, stored as pending until settlement.
    pub output_notes: Vec<Note>,
    /// Nullifiers of the real notes being spent.
    pub spent_nullifiers: Vec<Hash32>,
    pub claim: Option<ClaimTx>,
}

#[derive(Clone, Debug)]
pub struct ProofOutput {
    pub tx_id: TxId,
    /// Inner proof record followed by the prover's bytes.
    pub proof_data: Vec<u8>,
    pub offchain_tx_data: Vec<u8>,
    pub user_tx: CoreUserTx,
    pub output_notes: Vec<Note>,
    pub spent_nullifiers: Vec<Hash32>,
    pub claim: Option<ClaimTx>,
}
