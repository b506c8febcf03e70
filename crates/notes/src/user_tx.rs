//! Per-user transaction records and the DeFi interaction lifecycle

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tree::Hash32;

use crate::bridge::BridgeCallData;
use crate::error::{NotesError, Result};
use crate::keys::AccountPublicKey;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(#[serde(with = "tree::hex_serde::hash")] pub Hash32);

impl TxId {
    pub fn as_bytes(&self) -> &Hash32 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId(0x{})", hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Deposit,
    Transfer,
    Withdraw,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPaymentTx {
    pub tx_id: TxId,
    pub user_id: AccountPublicKey,
    pub kind: PaymentKind,
    pub asset_id: u32,
    pub public_value: u128,
    /// L1 address funds come from or go to, when public value moves.
    pub public_owner: Option<Hash32>,
    pub private_input: u128,
    pub recipient_private_output: u128,
    pub sender_private_output: u128,
    pub is_sender: bool,
    pub is_recipient: bool,
    pub fee: u128,
    pub created: DateTime<Utc>,
    pub settled: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccountTx {
    pub tx_id: TxId,
    pub user_id: AccountPublicKey,
    pub alias_hash: Hash32,
    pub new_spending_public_key_1: Option<AccountPublicKey>,
    pub new_spending_public_key_2: Option<AccountPublicKey>,
    pub migrated: bool,
    pub fee: u128,
    pub created: DateTime<Utc>,
    pub settled: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DefiInteractionState {
    Pending,
    AwaitingFinalisation,
    AwaitingSettlement,
    Settled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefiInteractionResult {
    pub state: DefiInteractionState,
    pub interaction_nonce: Option<u32>,
    pub is_async: Option<bool>,
    pub success: Option<bool>,
    pub output_value_a: Option<u128>,
    pub output_value_b: Option<u128>,
    pub claim_settled: Option<DateTime<Utc>>,
    pub finalised: Option<DateTime<Utc>>,
    pub claim_tx_id: Option<TxId>,
}

impl Default for DefiInteractionResult {
    fn default() -> Self {
        Self {
            state: DefiInteractionState::Pending,
            interaction_nonce: None,
            is_async: None,
            success: None,
            output_value_a: None,
            output_value_b: None,
            claim_settled: None,
            finalised: None,
            claim_tx_id: None,
        }
    }
}

/// Chain observations that move a DeFi deposit forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefiEvent {
    DepositSettled {
        interaction_nonce: u32,
        is_async: bool,
        settled: DateTime<Utc>,
    },
    InteractionFinalised {
        success: bool,
        output_value_a: u128,
        output_value_b: u128,
        finalised: DateTime<Utc>,
    },
    ClaimSettled {
        claim_tx_id: TxId,
        settled: DateTime<Utc>,
    },
}

impl DefiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DefiEvent::DepositSettled { .. } => "deposit-settled",
            DefiEvent::InteractionFinalised { .. } => "interaction-finalised",
            DefiEvent::ClaimSettled { .. } => "claim-settled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefiTx {
    pub tx_id: TxId,
    pub user_id: AccountPublicKey,
    pub bridge_call_data: BridgeCallData,
    pub deposit_value: u128,
    pub fee: u128,
    pub created: DateTime<Utc>,
    pub settled: Option<DateTime<Utc>>,
    pub interaction_result: DefiInteractionResult,
}

impl UserDefiTx {
    pub fn new(
        tx_id: TxId,
        user_id: AccountPublicKey,
        bridge_call_data: BridgeCallData,
        deposit_value: u128,
        fee: u128,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            tx_id,
            user_id,
            bridge_call_data,
            deposit_value,
            fee,
            created,
            settled: None,
            interaction_result: DefiInteractionResult::default(),
        }
    }

    pub fn state(&self) -> DefiInteractionState {
        self.interaction_result.state
    }

    /// Apply the one event that leads to the next state.
    ///
    /// The lifecycle is strictly
    /// `Pending -> AwaitingFinalisation -> AwaitingSettlement -> Settled`;
    /// anything else is rejected and leaves the record untouched.
    pub fn advance(&mut self, event: DefiEvent) -> Result<DefiInteractionState> {
        use DefiInteractionState::*;

        let result = &mut self.interaction_result;
        match (result.state, event) {
            (Pending, DefiEvent::DepositSettled { interaction_nonce, is_async, settled }) => {
                result.interaction_nonce = Some(interaction_nonce);
                result.is_async = Some(is_async);
                self.settled = Some(settled);
                result.state = AwaitingFinalisation;
            }
            (
                AwaitingFinalisation,
                DefiEvent::InteractionFinalised { success, output_value_a, output_value_b, finalised },
            ) => {
                result.success = Some(success);
                result.output_value_a = Some(output_value_a);
                result.output_value_b = Some(output_value_b);
                result.finalised = Some(finalised);
                result.state = AwaitingSettlement;
            }
            (AwaitingSettlement, DefiEvent::ClaimSettled { claim_tx_id, settled }) => {
                result.claim_tx_id = Some(claim_tx_id);
                result.claim_settled = Some(settled);
                result.state = Settled;
            }
            (from, event) => {
                return Err(NotesError::InvalidTransition { from, event: event.name() });
            }
        }
        Ok(result.state)
    }
}

/// Output of a finalised interaction, recorded when the claim settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefiClaimTx {
    pub tx_id: TxId,
    pub defi_tx_id: TxId,
    pub user_id: AccountPublicKey,
    pub bridge_call_data: BridgeCallData,
    pub deposit_value: u128,
    pub success: bool,
    pub output_value_a: u128,
    pub output_value_b: u128,
    pub settled: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreUserTx {
    Payment(UserPaymentTx),
    Account(UserAccountTx),
    Defi(UserDefiTx),
    DefiClaim(UserDefiClaimTx),
}

impl CoreUserTx {
    pub fn tx_id(&self) -> TxId {
        match self {
            CoreUserTx::Payment(tx) => tx.tx_id,
            CoreUserTx::Account(tx) => tx.tx_id,
            CoreUserTx::Defi(tx) => tx.tx_id,
            CoreUserTx::DefiClaim(tx) => tx.tx_id,
        }
    }

    pub fn user_id(&self) -> AccountPublicKey {
        match self {
            CoreUserTx::Payment(tx) => tx.user_id,
            CoreUserTx::Account(tx) => tx.user_id,
            CoreUserTx::Defi(tx) => tx.user_id,
            CoreUserTx::DefiClaim(tx) => tx.user_id,
        }
    }

    pub fn settled(&self) -> Option<DateTime<Utc>> {
        match self {
            CoreUserTx::Payment(tx) => tx.settled,
            CoreUserTx::Account(tx) => tx.settled,
            CoreUserTx::Defi(tx) => tx.settled,
            CoreUserTx::DefiClaim(tx) => Some(tx.settled),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled().is_some()
    }

    /// Mark a payment or account tx settled; no-op for DeFi records, which
    /// settle through [`UserDefiTx::advance`].
    pub fn settle(&mut self, at: DateTime<Utc>) {
        match self {
            CoreUserTx::Payment(tx) => tx.settled = tx.settled.or(Some(at)),
            CoreUserTx::Account(tx) => tx.settled = tx.settled.or(Some(at)),
            CoreUserTx::Defi(_) | CoreUserTx::DefiClaim(_) => {}
        }
    }
}

/// Secret half of a DeFi deposit, kept until the claim note is spent.
///
/// The claim nullifier only exists once the deposit settles and the rollup
/// assigns the interaction nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTx {
    pub defi_tx_id: TxId,
    pub user_id: AccountPublicKey,
    pub claim_partial_commitment: Hash32,
    /// Secret of the value notes the claim will create.
    pub value_note_secret: Hash32,
    pub interaction_nonce: Option<u32>,
    pub claim_nullifier: Option<Hash32>,
}
