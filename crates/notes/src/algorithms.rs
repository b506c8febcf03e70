//! Commitments and nullifiers for value, claim and account notes
//!
//! Every preimage starts with a short domain tag so the same bytes never
//! collide across note kinds.

use std::sync::Arc;

use tree::{Hash32, Hasher};

use crate::encoding::{u128_word, u32_word};
use crate::keys::{AccountPrivateKey, AccountPublicKey};
use crate::note::{TreeClaimNote, TreeNote};

const TAG_VALUE_PARTIAL: &[u8] = b"vnp";
const TAG_VALUE_COMMIT: &[u8] = b"vnc";
const TAG_VALUE_NULLIFIER: &[u8] = b"vnn";
const TAG_CLAIM_PARTIAL: &[u8] = b"cnp";
const TAG_CLAIM_COMMIT: &[u8] = b"cnc";
const TAG_CLAIM_NULLIFIER: &[u8] = b"cnn";
const TAG_ACCOUNT_COMMIT: &[u8] = b"anc";
const TAG_ALIAS_NULLIFIER: &[u8] = b"aan";
const TAG_ACCOUNT_NULLIFIER: &[u8] = b"apn";
const TAG_NULLIFIER_KEY: &[u8] = b"nk";

#[derive(Clone)]
pub struct NoteAlgorithms {
    hasher: Arc<dyn Hasher>,
}

impl NoteAlgorithms {
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    fn hash(&self, tag: &[u8], parts: &[&[u8]]) -> Hash32 {
        let mut buf = Vec::with_capacity(tag.len() + parts.iter().map(|p| p.len()).sum::<usize>());
        buf.extend_from_slice(tag);
        for p in parts {
            buf.extend_from_slice(p);
        }
        self.hasher.hash_to_field(&buf)
    }

    /// Owner-side half of a value note, independent of value and asset.
    pub fn value_note_partial_commitment(
        &self,
        note_secret: &Hash32,
        owner: &AccountPublicKey,
        account_required: bool,
        creator_pubkey: &Hash32,
    ) -> Hash32 {
        self.hash(
            TAG_VALUE_PARTIAL,
            &[&note_secret[..], &owner.as_bytes()[..], &[account_required as u8], &creator_pubkey[..]],
        )
    }

    pub fn value_note_commitment(&self, note: &TreeNote) -> Hash32 {
        let partial = self.value_note_partial_commitment(
            &note.note_secret,
            &note.owner,
            note.account_required,
            &note.creator_pubkey,
        );
        self.hash(
            TAG_VALUE_COMMIT,
            &[&partial[..], &u128_word(note.value), &u32_word(note.asset_id), &note.input_nullifier],
        )
    }

    /// Only the owner's private key can derive the nullifier. `real` is false
    /// for padding notes so they never collide with spendable ones.
    pub fn value_note_nullifier(&self, commitment: &Hash32, private_key: &AccountPrivateKey, real: bool) -> Hash32 {
        let nk = self.hash(TAG_NULLIFIER_KEY, &[&private_key.as_bytes()[..]]);
        self.hash(TAG_VALUE_NULLIFIER, &[&commitment[..], &nk, &[real as u8]])
    }

    pub fn claim_note_partial_commitment(&self, note: &TreeClaimNote) -> Hash32 {
        self.hash(
            TAG_CLAIM_PARTIAL,
            &[
                &u128_word(note.value)[..],
                &note.bridge_call_data.to_word(),
                &note.value_note_partial_commitment,
                &note.input_nullifier,
            ],
        )
    }

    /// Completed by the rollup once the interaction nonce and fee are known.
    pub fn claim_note_complete_partial_commitment(&self, partial: &Hash32, interaction_nonce: u32, fee: u128) -> Hash32 {
        self.hash(TAG_CLAIM_COMMIT, &[&partial[..], &u32_word(interaction_nonce), &u128_word(fee)])
    }

    pub fn claim_note_commitment(&self, note: &TreeClaimNote) -> Hash32 {
        let partial = self.claim_note_partial_commitment(note);
        self.claim_note_complete_partial_commitment(&partial, note.defi_interaction_nonce, note.fee)
    }

    pub fn claim_note_nullifier(&self, commitment: &Hash32) -> Hash32 {
        self.hash(TAG_CLAIM_NULLIFIER, &[&commitment[..]])
    }

    pub fn account_note_commitment(
        &self,
        alias_hash: &Hash32,
        account_public_key: &AccountPublicKey,
        spending_public_key: &AccountPublicKey,
    ) -> Hash32 {
        self.hash(
            TAG_ACCOUNT_COMMIT,
            &[&alias_hash[..], &account_public_key.as_bytes()[..], &spending_public_key.as_bytes()[..]],
        )
    }

    pub fn account_alias_hash_nullifier(&self, alias_hash: &Hash32) -> Hash32 {
        self.hash(TAG_ALIAS_NULLIFIER, &[&alias_hash[..]])
    }

    pub fn account_public_key_nullifier(&self, account_public_key: &AccountPublicKey) -> Hash32 {
        self.hash(TAG_ACCOUNT_NULLIFIER, &[&account_public_key.as_bytes()[..]])
    }

    pub fn alias_hash(&self, alias: &str) -> Hash32 {
        self.hasher.hash_to_field(alias.trim().to_lowercase().as_bytes())
    }
}
