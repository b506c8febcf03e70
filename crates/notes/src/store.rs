//! Per-user note and transaction records on a shared key-value store
//!
//! Key layout (values bincode):
//! * `user:<pubkey>` → [`UserData`]
//! * `note:<pubkey>:<commitment>` → [`Note`]
//! * `nullifier:<nullifier>` → `(pubkey, commitment)`
//! * `tx:<pubkey>:<tx id>` → [`CoreUserTx`]
//! * `claim:<defi tx id>` → [`ClaimTx`], `claim-nullifier:<nullifier>` → defi tx id
//! * `reserved:<pubkey>:<nullifier>` → tx id spending the note

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tree::{Hash32, Storage, WriteBatch};

use crate::error::{NotesError, Result};
use crate::keys::AccountPublicKey;
use crate::note::Note;
use crate::user_tx::{ClaimTx, CoreUserTx, TxId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub id: AccountPublicKey,
    /// Last rollup whose blocks have been applied to this user.
    pub synced_to_rollup: Option<u32>,
}

pub struct UserDataStore<S: Storage> {
    storage: S,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| NotesError::Ser(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| NotesError::Ser(e.to_string()))
}

fn key(parts: &[&str]) -> Vec<u8> {
    parts.join(":").into_bytes()
}

impl<S: Storage> UserDataStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn get_as<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.storage.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_as<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.storage
            .scan_prefix(prefix)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    // users

    pub fn add_user(&self, user: &UserData) -> Result<()> {
        self.storage.put(&key(&["user", &user.id.to_hex()]), &encode(user)?)?;
        Ok(())
    }

    pub fn get_user(&self, id: &AccountPublicKey) -> Result<Option<UserData>> {
        self.get_as(&key(&["user", &id.to_hex()]))
    }

    pub fn get_users(&self) -> Result<Vec<UserData>> {
        self.scan_as(b"user:")
    }

    /// Drops the user record. Notes and txs stay behind and are picked up
    /// again if the user is re-added.
    pub fn remove_user(&self, id: &AccountPublicKey) -> Result<()> {
        self.storage.delete(&key(&["user", &id.to_hex()]))?;
        Ok(())
    }

    pub fn set_synced_to_rollup(&self, id: &AccountPublicKey, rollup_id: u32) -> Result<()> {
        let mut user = self.get_user(id)?.unwrap_or(UserData { id: *id, synced_to_rollup: None });
        user.synced_to_rollup = Some(rollup_id);
        self.add_user(&user)
    }

    // notes

    /// Insert or replace a note and its nullifier index entry.
    pub fn add_note(&self, note: &Note) -> Result<()> {
        let owner = note.owner().to_hex();
        let commitment = hex::encode(note.commitment);
        let mut batch = WriteBatch::new();
        batch.put(key(&["note", &owner, &commitment]), encode(note)?);
        batch.put(
            key(&["nullifier", &hex::encode(note.nullifier)]),
            encode(&(note.owner(), note.commitment))?,
        );
        self.storage.write_batch(batch)?;
        Ok(())
    }

    pub fn get_note(&self, owner: &AccountPublicKey, commitment: &Hash32) -> Result<Option<Note>> {
        self.get_as(&key(&["note", &owner.to_hex(), &hex::encode(commitment)]))
    }

    pub fn get_note_by_nullifier(&self, nullifier: &Hash32) -> Result<Option<Note>> {
        let Some((owner, commitment)) =
            self.get_as::<(AccountPublicKey, Hash32)>(&key(&["nullifier", &hex::encode(nullifier)]))?
        else {
            return Ok(None);
        };
        self.get_note(&owner, &commitment)
    }

    /// Flag the note spent by `nullifier`, if we own it.
    pub fn nullify_note(&self, nullifier: &Hash32) -> Result<Option<Note>> {
        let Some(mut note) = self.get_note_by_nullifier(nullifier)? else {
            return Ok(None);
        };
        note.nullified = true;
        let mut batch = WriteBatch::new();
        batch.put(
            key(&["note", &note.owner().to_hex(), &hex::encode(note.commitment)]),
            encode(&note)?,
        );
        batch.delete(key(&["reserved", &note.owner().to_hex(), &hex::encode(nullifier)]));
        self.storage.write_batch(batch)?;
        Ok(Some(note))
    }

    pub fn get_notes(&self, owner: &AccountPublicKey) -> Result<Vec<Note>> {
        let prefix = format!("note:{}:", owner.to_hex());
        self.scan_as(prefix.as_bytes())
    }

    /// Unspent notes of one asset.
    pub fn get_unspent_notes(&self, owner: &AccountPublicKey, asset_id: u32) -> Result<Vec<Note>> {
        Ok(self
            .get_notes(owner)?
            .into_iter()
            .filter(|n| !n.nullified && n.asset_id() == asset_id)
            .collect())
    }

    // txs

    pub fn add_tx(&self, tx: &CoreUserTx) -> Result<()> {
        let k = key(&["tx", &tx.user_id().to_hex(), &tx.tx_id().to_hex()]);
        self.storage.put(&k, &encode(tx)?)?;
        Ok(())
    }

    pub fn get_tx(&self, user: &AccountPublicKey, tx_id: &TxId) -> Result<Option<CoreUserTx>> {
        self.get_as(&key(&["tx", &user.to_hex(), &tx_id.to_hex()]))
    }

    pub fn get_txs(&self, user: &AccountPublicKey) -> Result<Vec<CoreUserTx>> {
        let prefix = format!("tx:{}:", user.to_hex());
        self.scan_as(prefix.as_bytes())
    }

    pub fn get_pending_txs(&self, user: &AccountPublicKey) -> Result<Vec<CoreUserTx>> {
        Ok(self
            .get_txs(user)?
            .into_iter()
            .filter(|tx| !tx.is_settled())
            .collect())
    }

    // claims

    pub fn add_claim_tx(&self, claim: &ClaimTx) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key(&["claim", &claim.defi_tx_id.to_hex()]), encode(claim)?);
        if let Some(nullifier) = &claim.claim_nullifier {
            batch.put(key(&["claim-nullifier", &hex::encode(nullifier)]), encode(&claim.defi_tx_id)?);
        }
        self.storage.write_batch(batch)?;
        Ok(())
    }

    pub fn get_claim_tx(&self, defi_tx_id: &TxId) -> Result<Option<ClaimTx>> {
        self.get_as(&key(&["claim", &defi_tx_id.to_hex()]))
    }

    pub fn get_claim_tx_by_nullifier(&self, nullifier: &Hash32) -> Result<Option<ClaimTx>> {
        let Some(defi_tx_id) = self.get_as::<TxId>(&key(&["claim-nullifier", &hex::encode(nullifier)]))? else {
            return Ok(None);
        };
        self.get_claim_tx(&defi_tx_id)
    }

    // reservations

    /// Mark notes as being spent by an unsettled tx so the picker skips them.
    pub fn reserve_nullifiers(&self, user: &AccountPublicKey, nullifiers: &[Hash32], tx_id: &TxId) -> Result<()> {
        let mut batch = WriteBatch::new();
        for n in nullifiers {
            batch.put(key(&["reserved", &user.to_hex(), &hex::encode(n)]), encode(tx_id)?);
        }
        self.storage.write_batch(batch)?;
        Ok(())
    }

    pub fn release_nullifiers(&self, user: &AccountPublicKey, nullifiers: &[Hash32]) -> Result<()> {
        let mut batch = WriteBatch::new();
        for n in nullifiers {
            batch.delete(key(&["reserved", &user.to_hex(), &hex::encode(n)]));
        }
        self.storage.write_batch(batch)?;
        Ok(())
    }

    pub fn reserved_nullifiers(&self, user: &AccountPublicKey) -> Result<HashSet<Hash32>> {
        let prefix = format!("reserved:{}:", user.to_hex());
        self.storage
            .scan_prefix(prefix.as_bytes())?
            .iter()
            .map(|(k, _)| {
                let hex_part = &k[prefix.len()..];
                let s = std::str::from_utf8(hex_part).map_err(|e| NotesError::Ser(e.to_string()))?;
                tree::hex_serde::decode_hash(s).map_err(NotesError::Ser)
            })
            .collect()
    }
}
