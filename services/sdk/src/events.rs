use notes::{AccountPublicKey, TxId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Notifications fanned out to every subscriber of a [`crate::core_sdk::CoreSdk`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkEvent {
    UpdatedWorldState {
        rollup_id: u32,
        data_size: u64,
    },
    UpdatedUserState {
        user_id: AccountPublicKey,
        rollup_id: u32,
    },
    UpdatedUserTx {
        user_id: AccountPublicKey,
        tx_id: TxId,
    },
    VersionMismatch {
        client: String,
        server: String,
    },
    SyncStopped,
}

pub type EventSender = broadcast::Sender<SdkEvent>;

pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(256);
    tx
}

/// Send without caring whether anyone is listening.
pub fn emit(tx: &EventSender, event: SdkEvent) {
    let _ = tx.send(event);
}
