//! Account keys
//!
//! One 32-byte secret drives both halves of an account: an x25519 key for
//! viewing-key encryption and an ed25519 key for transaction signatures.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::{NotesError, Result};

pub const PRIVATE_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 64;
pub const SIGNATURE_SIZE: usize = 64;

pub type SignatureBytes = [u8; SIGNATURE_SIZE];

/// `x25519 public (32) || ed25519 verifying key (32)`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountPublicKey([u8; PUBLIC_KEY_SIZE]);

impl AccountPublicKey {
    pub const ZERO: AccountPublicKey = AccountPublicKey([0u8; PUBLIC_KEY_SIZE]);

    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            NotesError::InvalidData(format!("public key must be {PUBLIC_KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| NotesError::InvalidData(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn encryption_key(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[..32]);
        out
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[32..]);
        out
    }

    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.verifying_key_bytes()) else {
            return false;
        };
        key.verify(message, &Signature::from_bytes(signature)).is_ok()
    }
}

impl fmt::Display for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountPublicKey(0x{}…)", hex::encode(&self.0[..6]))
    }
}

impl Serialize for AccountPublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountPublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccountPrivateKey([u8; PRIVATE_KEY_SIZE]);

impl AccountPrivateKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PRIVATE_KEY_SIZE] = bytes.try_into().map_err(|_| {
            NotesError::InvalidData(format!("private key must be {PRIVATE_KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| NotesError::InvalidData(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.0
    }

    pub fn public_key(&self) -> AccountPublicKey {
        let enc = X25519Public::from(&StaticSecret::from(self.0));
        let sig = SigningKey::from_bytes(&self.0).verifying_key();

        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out[..32].copy_from_slice(enc.as_bytes());
        out[32..].copy_from_slice(sig.as_bytes());
        AccountPublicKey(out)
    }

    /// x25519 agreement with a peer's ephemeral key.
    pub fn shared_secret(&self, peer: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.0);
        secret.diffie_hellman(&X25519Public::from(*peer)).to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SigningKey::from_bytes(&self.0).sign(message).to_bytes()
    }
}

impl fmt::Debug for AccountPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountPrivateKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = AccountPrivateKey::random(&mut rand::thread_rng());
        let pk = key.public_key();
        let sig = key.sign(b"payload");
        assert!(pk.verify(b"payload", &sig));
        assert!(!pk.verify(b"other", &sig));
    }

    #[test]
    fn hex_roundtrip() {
        let pk = AccountPrivateKey::from_bytes([3u8; 32]).public_key();
        assert_eq!(AccountPublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert!(AccountPublicKey::from_hex("abcd").is_err());
    }
}
