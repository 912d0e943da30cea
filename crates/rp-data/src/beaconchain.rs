//! Block-explorer lookup of relay metadata per slot.
//!
//! The explorer exposes two endpoints that are chained for every slot:
//! `/api/v1/slot/{slot}` yields the execution block number, and
//! `/api/v1/execution/block/{block}` yields the relay tag, the fee recipient
//! the relay paid, and the block's MEV reward in wei.
//!
//! ## Rate Limits
//!
//! The free tier allows roughly ten requests per minute. The client itself does
//! not throttle; callers pace requests (see the relay-compliance filter).

use eyre::{eyre, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::types::{RelayMetadata, RelayResolution};

/// Public explorer base URL.
pub const DEFAULT_BEACONCHAIN_URL: &str = "https://beaconcha.in";

const WEI_PER_ETH: f64 = 1e18;

/// Source of relay metadata for a slot's block.
#[allow(async_fn_in_trait)]
pub trait RelayLookup {
    /// Resolves the relay involvement of the block produced in `slot`.
    ///
    /// # Errors
    /// Returns error on any transient failure; callers decide whether to retry.
    async fn lookup_slot(&self, slot: u64) -> Result<RelayResolution>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SlotData {
    exec_block_number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayData {
    tag: String,
    producer_fee_recipient: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionBlockData {
    relay: Option<RelayData>,
    #[serde(default)]
    block_mev_reward: serde_json::Value,
}

fn wei_value_to_eth(value: &serde_json::Value) -> Result<f64> {
    match value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(|wei| wei / WEI_PER_ETH)
            .ok_or_else(|| eyre!("unrepresentable blockMevReward {n}")),
        serde_json::Value::String(s) => s
            .parse::<u128>()
            .map(|wei| wei as f64 / WEI_PER_ETH)
            .wrap_err_with(|| format!("invalid blockMevReward {s:?}")),
        other => Err(eyre!("unexpected blockMevReward {other}")),
    }
}

fn resolution_from(block: ExecutionBlockData) -> Result<RelayResolution> {
    match block.relay {
        None => Ok(RelayResolution::NoRelay),
        Some(relay) => Ok(RelayResolution::Relayed(RelayMetadata {
            relay_tag: relay.tag,
            producer_fee_recipient: relay.producer_fee_recipient,
            block_mev_reward: wei_value_to_eth(&block.block_mev_reward)?,
        })),
    }
}

/// HTTP client for the explorer API.
pub struct BeaconchainClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BeaconchainClient {
    /// Builds a client for `base_url` with an optional API key.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .wrap_err("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .wrap_err_with(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(eyre!("explorer returned HTTP {}: {}", status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .wrap_err_with(|| format!("failed to decode response from {url}"))
    }
}

impl RelayLookup for BeaconchainClient {
    #[tracing::instrument(skip(self))]
    async fn lookup_slot(&self, slot: u64) -> Result<RelayResolution> {
        let slot_data: Envelope<SlotData> = self.get_json(&format!("/api/v1/slot/{slot}")).await?;
        let block_number = slot_data.data.exec_block_number;

        let blocks: Envelope<Vec<ExecutionBlockData>> = self
            .get_json(&format!("/api/v1/execution/block/{block_number}"))
            .await?;
        let block = blocks
            .data
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("explorer returned no data for block {block_number}"))?;

        let resolution = resolution_from(block)?;
        debug!(slot, block_number, relay = ?resolution.relay_tag(), "resolved relay metadata");
        Ok(resolution)
    }
}
