//! Shared test helpers and utilities.
//!
//! Provides factory functions for slot records, reference data and an
//! in-process relay lookup double.

#![allow(dead_code)]

use rp_analysis::config::{slot_to_timestamp, AnalysisConfig, RelayFilterConfig, PENALTY_START_SLOT};
use rp_data::beaconchain::RelayLookup;
use rp_data::store::ResultsStore;
use rp_data::types::{ExchangeSnapshot, RawSlotRecord, RelayMetadata, RelayResolution};
use std::cell::Cell;
use std::collections::HashMap;
use std::time::Duration;

pub const NODE_A: &str = "0xAaAa000000000000000000000000000000000001";
pub const NODE_B: &str = "0xbbbb000000000000000000000000000000000002";
pub const DIST_A: &str = "0xdddd00000000000000000000000000000000000a";
pub const DIST_B: &str = "0xdddd00000000000000000000000000000000000b";
pub const WRONG_RECIPIENT: &str = "0xeeee0000000000000000000000000000000000ff";

/// Creates an in-memory results store.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> ResultsStore {
    ResultsStore::new(":memory:").expect("in-memory store should always open")
}

/// Analysis config with no pauses between lookups and no progress bar.
pub fn fast_config() -> AnalysisConfig {
    AnalysisConfig {
        relay_filter: RelayFilterConfig {
            request_interval: Duration::ZERO,
            failure_backoff: Duration::ZERO,
            max_consecutive_failures: 2,
            show_progress: false,
        },
        ..AnalysisConfig::default()
    }
}

/// Pool slot `PENALTY_START_SLOT + offset` of node A, vanilla, paying its distributor.
///
/// `reth_portion` works out to `(1 - 0.1) * (1 - 1/2) = 0.45`.
pub fn pool_slot(offset: u64) -> RawSlotRecord {
    RawSlotRecord {
        slot: PENALTY_START_SLOT + offset,
        node_address: NODE_A.to_string(),
        proposer_index: Some(1_000 + offset),
        is_rocketpool: true,
        in_smoothing_pool: false,
        avg_fee: Some(0.1),
        eth_collat_ratio: Some(2.0),
        max_bid: None,
        mev_reward: None,
        mev_reward_relay: None,
        priority_fees: Some(0.01),
        fee_recipient: Some(DIST_A.to_string()),
    }
}

/// MEV-boost variant of [`pool_slot`].
pub fn mev_slot(offset: u64, max_bid: Option<f64>, mev_reward: f64, relay: &str) -> RawSlotRecord {
    RawSlotRecord {
        max_bid,
        mev_reward: Some(mev_reward),
        mev_reward_relay: Some(relay.to_string()),
        ..pool_slot(offset)
    }
}

pub fn of_node_b(record: RawSlotRecord, fee_recipient: &str) -> RawSlotRecord {
    RawSlotRecord {
        node_address: NODE_B.to_string(),
        fee_recipient: Some(fee_recipient.to_string()),
        ..record
    }
}

pub fn distributors() -> HashMap<String, String> {
    HashMap::from([
        (NODE_A.to_string(), DIST_A.to_string()),
        (NODE_B.to_string(), DIST_B.to_string()),
    ])
}

/// Two ledger points bracketing the slot range, exchange rate 1.0 -> 1.05.
pub fn ledger(start_slot: u64, end_slot: u64) -> Vec<ExchangeSnapshot> {
    vec![
        ExchangeSnapshot {
            block: 16_000_000,
            total_eth: 100_000.0,
            staking_eth: 90_000.0,
            reth_supply: 100_000.0,
            timestamp: slot_to_timestamp(start_slot),
        },
        ExchangeSnapshot {
            block: 16_500_000,
            total_eth: 105_000.0,
            staking_eth: 95_000.0,
            reth_supply: 100_000.0,
            timestamp: slot_to_timestamp(end_slot),
        },
    ]
}

pub fn relayed(relay_tag: &str, producer_fee_recipient: &str, block_mev_reward: f64) -> RelayResolution {
    RelayResolution::Relayed(RelayMetadata {
        relay_tag: relay_tag.to_string(),
        producer_fee_recipient: producer_fee_recipient.to_string(),
        block_mev_reward,
    })
}

/// Lookup double answering from a fixed table; unknown slots saw no relay.
pub struct StaticLookup {
    answers: HashMap<u64, RelayResolution>,
    calls: Cell<usize>,
}

impl StaticLookup {
    pub fn new(answers: HashMap<u64, RelayResolution>) -> Self {
        Self {
            answers,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl RelayLookup for StaticLookup {
    async fn lookup_slot(&self, slot: u64) -> eyre::Result<RelayResolution> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .answers
            .get(&slot)
            .cloned()
            .unwrap_or(RelayResolution::NoRelay))
    }
}

/// Lookup double that always fails.
pub struct DownLookup;

impl RelayLookup for DownLookup {
    async fn lookup_slot(&self, slot: u64) -> eyre::Result<RelayResolution> {
        Err(eyre::eyre!("explorer unavailable for slot {slot}"))
    }
}
