use anyhow::Context;
use async_trait::async_trait;
use notes::TxId;

use crate::block::{decode_blocks, Block};
use crate::provider::{RollupProvider, RollupProviderStatus, Tx};

pub struct HttpRollupProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRollupProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RollupProvider for HttpRollupProvider {
    async fn get_status(&self) -> anyhow::Result<RollupProviderStatus> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn get_blocks(&self, from: u32, take: u32) -> anyhow::Result<Vec<Block>> {
        let url = format!("{}/get-blocks", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[("from", from), ("take", take)])
            .send()
            .await?
            .error_for_status()?;
        let body = resp.bytes().await?;
        decode_blocks(&body).context("provider returned malformed blocks")
    }

    async fn get_latest_rollup_id(&self) -> anyhow::Result<Option<u32>> {
        let url = format!("{}/latest-rollup-id", self.base_url);
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn send_txs(&self, txs: Vec<Tx>) -> anyhow::Result<Vec<TxId>> {
        let url = format!("{}/txs", self.base_url);
        let resp = self.client.post(url).json(&txs).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}
