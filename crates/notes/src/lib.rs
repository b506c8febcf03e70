//! Account keys, notes and per-user records
//!
//! Everything a client needs to recognise its own notes in synced blocks,
//! pick inputs for new transactions and follow them to settlement.

mod algorithms;
mod bridge;
mod decrypt;
pub mod encoding;
mod error;
mod keys;
mod note;
mod picker;
mod store;
mod user_tx;
mod viewing_key;

pub use algorithms::NoteAlgorithms;
pub use bridge::BridgeCallData;
pub use decrypt::{
    batch_decrypt_notes, create_decryptor, split_viewing_keys, Decryptor, PooledDecryptor, SingleDecryptor,
};
pub use error::{NotesError, Result};
pub use keys::{
    AccountPrivateKey, AccountPublicKey, SignatureBytes, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use note::{DecryptedNote, Note, TreeClaimNote, TreeNote, NOTE_PLAINTEXT_SIZE};
pub use picker::{pick, pick_by, NotePicker};
pub use store::{UserData, UserDataStore};
pub use user_tx::{
    ClaimTx, CoreUserTx, DefiEvent, DefiInteractionResult, DefiInteractionState, PaymentKind, TxId,
    UserAccountTx, UserDefiClaimTx, UserDefiTx, UserPaymentTx,
};
pub use viewing_key::{ViewingKey, VIEWING_KEY_SIZE};
