use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tree::{Hash32, HashPath};

use crate::bridge::BridgeCallData;
use crate::encoding::{u128_word, word_u128};
use crate::keys::AccountPublicKey;

/// `value(32 BE) | asset_id(4 BE) | account_required(1) | note_secret(32) | creator_pubkey(32)`
pub const NOTE_PLAINTEXT_SIZE: usize = 32 + 4 + 1 + 32 + 32;

/// Value note as committed to the data tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNote {
    pub owner: AccountPublicKey,
    pub value: u128,
    pub asset_id: u32,
    pub account_required: bool,
    pub note_secret: Hash32,
    /// Zero when the creator is not disclosed.
    pub creator_pubkey: Hash32,
    pub input_nullifier: Hash32,
}

impl TreeNote {
    pub fn new<R: RngCore + CryptoRng>(
        owner: AccountPublicKey,
        value: u128,
        asset_id: u32,
        account_required: bool,
        input_nullifier: Hash32,
        rng: &mut R,
    ) -> Self {
        let mut note_secret = [0u8; 32];
        rng.fill_bytes(&mut note_secret);
        Self {
            owner,
            value,
            asset_id,
            account_required,
            note_secret,
            creator_pubkey: [0u8; 32],
            input_nullifier,
        }
    }

    /// Zero-value note used to pad a join-split to two inputs or outputs.
    pub fn dummy<R: RngCore + CryptoRng>(owner: AccountPublicKey, asset_id: u32, rng: &mut R) -> Self {
        Self::new(owner, 0, asset_id, false, [0u8; 32], rng)
    }

    pub fn plaintext(&self) -> DecryptedNote {
        DecryptedNote {
            value: self.value,
            asset_id: self.asset_id,
            account_required: self.account_required,
            note_secret: self.note_secret,
            creator_pubkey: self.creator_pubkey,
        }
    }

    /// Rebuild the tree note a decrypted viewing key describes.
    ///
    /// The input nullifier is public: it is the matching nullifier of the
    /// inner proof that created the note.
    pub fn from_decrypted(note: &DecryptedNote, owner: AccountPublicKey, input_nullifier: Hash32) -> Self {
        Self {
            owner,
            value: note.value,
            asset_id: note.asset_id,
            account_required: note.account_required,
            note_secret: note.note_secret,
            creator_pubkey: note.creator_pubkey,
            input_nullifier,
        }
    }
}

/// Plaintext recovered from a viewing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedNote {
    pub value: u128,
    pub asset_id: u32,
    pub account_required: bool,
    pub note_secret: Hash32,
    pub creator_pubkey: Hash32,
}

impl DecryptedNote {
    pub fn to_bytes(&self) -> [u8; NOTE_PLAINTEXT_SIZE] {
        let mut out = [0u8; NOTE_PLAINTEXT_SIZE];
        out[..32].copy_from_slice(&u128_word(self.value));
        out[32..36].copy_from_slice(&self.asset_id.to_be_bytes());
        out[36] = self.account_required as u8;
        out[37..69].copy_from_slice(&self.note_secret);
        out[69..].copy_from_slice(&self.creator_pubkey);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NOTE_PLAINTEXT_SIZE || bytes[36] > 1 {
            return None;
        }
        let mut note_secret = [0u8; 32];
        note_secret.copy_from_slice(&bytes[37..69]);
        let mut creator_pubkey = [0u8; 32];
        creator_pubkey.copy_from_slice(&bytes[69..]);
        Some(Self {
            value: word_u128(&bytes[..32])?,
            asset_id: u32::from_be_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
            account_required: bytes[36] == 1,
            note_secret,
            creator_pubkey,
        })
    }
}

/// A value note owned by a local user.
///
/// Notes are never deleted. Spending flips `nullified`; `pending` notes are
/// outputs of our own txs that have not settled yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub tree_note: TreeNote,
    pub commitment: Hash32,
    pub nullifier: Hash32,
    pub index: Option<u64>,
    pub allow_chain: bool,
    pub nullified: bool,
    pub pending: bool,
    pub hash_path: Option<HashPath>,
}

impl Note {
    pub fn owner(&self) -> &AccountPublicKey {
        &self.tree_note.owner
    }

    pub fn value(&self) -> u128 {
        self.tree_note.value
    }

    pub fn asset_id(&self) -> u32 {
        self.tree_note.asset_id
    }

    pub fn is_spendable(&self) -> bool {
        !self.nullified && (!self.pending || self.allow_chain)
    }
}

/// Partial claim note created by a DeFi deposit. The interaction nonce and
/// fee are filled in by the rollup when the deposit settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeClaimNote {
    pub value: u128,
    pub bridge_call_data: BridgeCallData,
    pub value_note_partial_commitment: Hash32,
    pub input_nullifier: Hash32,
    pub defi_interaction_nonce: u32,
    pub fee: u128,
}
