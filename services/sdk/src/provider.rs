use async_trait::async_trait;
use notes::TxId;
use serde::{Deserialize, Serialize};

use crate::block::Block;

/// A proof ready for the rollup coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
    #[serde(with = "hex::serde")]
    pub proof_data: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub offchain_tx_data: Vec<u8>,
    /// Hex signature over the proof's tx id, for deposits from an L1 account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFees {
    pub asset_id: u32,
    pub base_fee: u128,
    /// Extra fee per tx type, in `TxType::ALL` order.
    pub tx_type_fees: Vec<u128>,
    /// Instant settlement costs this many next-rollup fees.
    pub instant_fee_multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupProviderStatus {
    pub version: String,
    pub rollup_size: u32,
    pub next_rollup_id: u32,
    pub asset_fees: Vec<AssetFees>,
}

#[async_trait]
pub trait RollupProvider: Send + Sync {
    async fn get_status(&self) -> anyhow::Result<RollupProviderStatus>;
    /// Up to `take` blocks starting at rollup `from`. May return fewer,
    /// including none when the provider has not produced them yet.
    async fn get_blocks(&self, from: u32, take: u32) -> anyhow::Result<Vec<Block>>;
    async fn get_latest_rollup_id(&self) -> anyhow::Result<Option<u32>>;
    async fn send_txs(&self, txs: Vec<Tx>) -> anyhow::Result<Vec<TxId>>;
}
