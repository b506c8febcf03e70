use notes::{AccountPrivateKey, AccountPublicKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

use crate::{AuthDbError, Result};

/// An account a given origin has been allowed to use, and the assets it may
/// move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizedAccount {
    pub public_key: AccountPublicKey,
    pub private_key: AccountPrivateKey,
    pub asset_ids: Vec<u32>,
}

impl AuthorizedAccount {
    pub fn new(private_key: AccountPrivateKey, asset_ids: Vec<u32>) -> Self {
        Self { public_key: private_key.public_key(), private_key, asset_ids }
    }

    /// Hex of `pubkey(64) | privkey(32) | asset_id(4 BE)*`.
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(PUBLIC_KEY_SIZE + PRIVATE_KEY_SIZE + 4 * self.asset_ids.len());
        buf.extend_from_slice(self.public_key.as_bytes());
        buf.extend_from_slice(self.private_key.as_bytes());
        for id in &self.asset_ids {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        hex::encode(buf)
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| AuthDbError::Ser(e.to_string()))?;
        let head = PUBLIC_KEY_SIZE + PRIVATE_KEY_SIZE;
        if bytes.len() < head || (bytes.len() - head) % 4 != 0 {
            return Err(AuthDbError::Ser(format!("account record of {} bytes", bytes.len())));
        }
        let public_key = AccountPublicKey::from_slice(&bytes[..PUBLIC_KEY_SIZE])
            .map_err(|e| AuthDbError::Ser(e.to_string()))?;
        let private_key = AccountPrivateKey::from_slice(&bytes[PUBLIC_KEY_SIZE..head])
            .map_err(|e| AuthDbError::Ser(e.to_string()))?;
        let asset_ids = bytes[head..]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { public_key, private_key, asset_ids })
    }
}

/// `auth:<origin>`; the origin is url-encoded so it never contains the
/// separator.
pub fn origin_key(origin: &str) -> Vec<u8> {
    let mut k = String::from("auth:");
    k.push_str(&urlencoding::encode(origin));
    k.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_key_escapes_separators() {
        assert_eq!(origin_key("https://app.example:8080"), b"auth:https%3A%2F%2Fapp.example%3A8080".to_vec());
    }

    #[test]
    fn decode_rejects_ragged_asset_list() {
        let acc = AuthorizedAccount::new(AccountPrivateKey::from_bytes([1u8; 32]), vec![0, 7]);
        let encoded = acc.encode();
        assert_eq!(AuthorizedAccount::decode(&encoded).unwrap(), acc);
        assert!(AuthorizedAccount::decode(&encoded[..encoded.len() - 2]).is_err());
    }
}
