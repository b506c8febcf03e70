//! Viewing keys: note plaintexts encrypted to the recipient's account key
//!
//! x25519 agreement against a fresh ephemeral key, blake3 key derivation,
//! chacha20-poly1305 sealing. Layout:
//! `ephemeral_pub(32) | nonce(12) | ciphertext(plaintext + 16-byte tag)`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::{NotesError, Result};
use crate::keys::{AccountPrivateKey, AccountPublicKey};
use crate::note::{DecryptedNote, NOTE_PLAINTEXT_SIZE};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KDF_CONTEXT: &[u8] = b"rollup.note.viewing-key.v1";

pub const VIEWING_KEY_SIZE: usize = 32 + NONCE_SIZE + NOTE_PLAINTEXT_SIZE + TAG_SIZE;

/// Always exactly [`VIEWING_KEY_SIZE`] bytes, deserialized ones included.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct ViewingKey(Vec<u8>);

impl TryFrom<Vec<u8>> for ViewingKey {
    type Error = NotesError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != VIEWING_KEY_SIZE {
            return Err(NotesError::InvalidData(format!(
                "viewing key must be {VIEWING_KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }
}

impl From<ViewingKey> for Vec<u8> {
    fn from(key: ViewingKey) -> Self {
        key.0
    }
}

impl ViewingKey {
    pub fn create<R: RngCore + CryptoRng>(
        note: &DecryptedNote,
        recipient: &AccountPublicKey,
        rng: &mut R,
    ) -> Result<Self> {
        let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.encryption_key()));
        let key = derive_key(shared.as_bytes(), ephemeral_pub.as_bytes());

        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| NotesError::InvalidData("viewing key cipher".into()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), note.to_bytes().as_slice())
            .map_err(|_| NotesError::InvalidData("viewing key encryption failed".into()))?;

        let mut out = Vec::with_capacity(VIEWING_KEY_SIZE);
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(Self(out))
    }

    /// Well-formed but undecryptable bytes for padding outputs.
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut out = vec![0u8; VIEWING_KEY_SIZE];
        rng.fill_bytes(&mut out);
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::try_from(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn ephemeral_pub_key(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0[..32]);
        out
    }

    /// `None` when the key belongs to someone else or the bytes are corrupt.
    pub fn decrypt(&self, private_key: &AccountPrivateKey) -> Option<DecryptedNote> {
        let epk = self.ephemeral_pub_key();
        let shared = private_key.shared_secret(&epk);
        let key = derive_key(&shared, &epk);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).ok()?;
        let nonce = &self.0[32..32 + NONCE_SIZE];
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), &self.0[32 + NONCE_SIZE..])
            .ok()?;
        DecryptedNote::from_bytes(&plaintext)
    }
}

impl std::fmt::Debug for ViewingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ViewingKey(0x{}…)", hex::encode(&self.0[..8.min(self.0.len())]))
    }
}

fn derive_key(shared_secret: &[u8], epk: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(KDF_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(epk);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DecryptedNote {
        DecryptedNote {
            value: 1_000,
            asset_id: 2,
            account_required: false,
            note_secret: [5u8; 32],
            creator_pubkey: [0u8; 32],
        }
    }

    #[test]
    fn owner_decrypts_others_do_not() {
        let mut rng = rand::thread_rng();
        let owner = AccountPrivateKey::random(&mut rng);
        let other = AccountPrivateKey::random(&mut rng);

        let vk = ViewingKey::create(&sample(), &owner.public_key(), &mut rng).unwrap();
        assert_eq!(vk.as_bytes().len(), VIEWING_KEY_SIZE);
        assert_eq!(vk.decrypt(&owner), Some(sample()));
        assert_eq!(vk.decrypt(&other), None);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut rng = rand::thread_rng();
        let owner = AccountPrivateKey::random(&mut rng);
        let vk = ViewingKey::create(&sample(), &owner.public_key(), &mut rng).unwrap();

        let mut bytes = vk.as_bytes().to_vec();
        bytes[60] ^= 1;
        assert_eq!(ViewingKey::from_slice(&bytes).unwrap().decrypt(&owner), None);
        assert!(ViewingKey::from_slice(&bytes[1..]).is_err());
    }

    #[test]
    fn deserializing_checks_the_length() {
        let mut rng = rand::thread_rng();
        let owner = AccountPrivateKey::random(&mut rng);
        let vk = ViewingKey::create(&sample(), &owner.public_key(), &mut rng).unwrap();

        let encoded = bincode::serialize(&vk).unwrap();
        assert_eq!(bincode::deserialize::<ViewingKey>(&encoded).unwrap(), vk);

        let short = bincode::serialize(&vec![7u8; 40]).unwrap();
        assert!(bincode::deserialize::<ViewingKey>(&short).is_err());
    }
}
