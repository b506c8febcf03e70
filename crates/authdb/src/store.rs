use notes::AccountPublicKey;
use thiserror::Error;
use tree::Storage;

use crate::{origin_key, AuthorizedAccount};

#[derive(Debug, Error)]
pub enum AuthDbError {
    #[error("Storage error: {0}")]
    Storage(#[from] tree::StorageError),
    #[error("Serialization error: {0}")]
    Ser(String),
}

pub type Result<T> = std::result::Result<T, AuthDbError>;

/// Per-origin lists of authorized accounts.
pub struct AuthDb<S: Storage> {
    storage: S,
}

impl<S: Storage> AuthDb<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn get_accounts(&self, origin: &str) -> Result<Vec<AuthorizedAccount>> {
        let Some(bytes) = self.storage.get(&origin_key(origin))? else {
            return Ok(Vec::new());
        };
        let records: Vec<String> = serde_json::from_slice(&bytes).map_err(|e| AuthDbError::Ser(e.to_string()))?;
        records.iter().map(|r| AuthorizedAccount::decode(r)).collect()
    }

    pub fn get_account(&self, origin: &str, public_key: &AccountPublicKey) -> Result<Option<AuthorizedAccount>> {
        Ok(self
            .get_accounts(origin)?
            .into_iter()
            .find(|a| a.public_key == *public_key))
    }

    /// Replaces an account with the same public key in place, otherwise
    /// appends.
    pub fn add_account(&self, origin: &str, account: AuthorizedAccount) -> Result<()> {
        let mut accounts = self.get_accounts(origin)?;
        match accounts.iter_mut().find(|a| a.public_key == account.public_key) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
        self.write(origin, &accounts)
    }

    /// Returns whether anything was removed; unknown keys are a no-op.
    pub fn remove_account(&self, origin: &str, public_key: &AccountPublicKey) -> Result<bool> {
        let mut accounts = self.get_accounts(origin)?;
        let before = accounts.len();
        accounts.retain(|a| a.public_key != *public_key);
        if accounts.len() == before {
            return Ok(false);
        }
        self.write(origin, &accounts)?;
        Ok(true)
    }

    pub fn clear_origin(&self, origin: &str) -> Result<()> {
        self.storage.delete(&origin_key(origin))?;
        Ok(())
    }

    fn write(&self, origin: &str, accounts: &[AuthorizedAccount]) -> Result<()> {
        let records: Vec<String> = accounts.iter().map(AuthorizedAccount::encode).collect();
        let val = serde_json::to_vec(&records).map_err(|e| AuthDbError::Ser(e.to_string()))?;
        self.storage.put(&origin_key(origin), &val)?;
        Ok(())
    }
}
