//! Type definitions for slot records, relay metadata and per-slot loss rows.

use serde::{Deserialize, Serialize};

/// One row of a slot snapshot file, as loaded.
///
/// Wei-denominated columns are already converted to ETH; malformed or empty
/// values are `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSlotRecord {
    /// Beacon chain slot.
    pub slot: u64,
    /// Operating node address (hex text).
    pub node_address: String,
    /// Proposer validator index (None if no block was produced).
    pub proposer_index: Option<u64>,
    /// Whether the proposer belongs to the staking pool.
    pub is_rocketpool: bool,
    /// Whether the node was enrolled in the smoothing pool.
    pub in_smoothing_pool: bool,
    /// Average node commission fraction.
    pub avg_fee: Option<f64>,
    /// (node capital + user capital) / node capital.
    pub eth_collat_ratio: Option<f64>,
    /// Best known relay bid in ETH.
    pub max_bid: Option<f64>,
    /// Reward reported by a relay in ETH (None for vanilla blocks).
    pub mev_reward: Option<f64>,
    /// Relay tag(s) that reported `mev_reward`.
    pub mev_reward_relay: Option<String>,
    /// Priority fees captured by the block in ETH.
    pub priority_fees: Option<f64>,
    /// Fee recipient actually used by the block (hex text).
    pub fee_recipient: Option<String>,
}

/// A normalized slot record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub slot: u64,
    pub node_address: String,
    pub proposer_index: u64,
    /// Pool membership; cleared for records with an implausibly low fee.
    pub is_rocketpool: bool,
    pub in_smoothing_pool: bool,
    pub avg_fee: f64,
    pub eth_collat_ratio: f64,
    /// Best known bid in ETH; may be filled in by imputation.
    pub max_bid: Option<f64>,
    pub mev_reward: Option<f64>,
    pub mev_reward_relay: Option<String>,
    pub priority_fees: f64,
    pub fee_recipient: Option<String>,
    /// Fraction of the slot's reward owed to pool token holders.
    pub reth_portion: f64,
    /// `None` until classified, and for records that cannot be classified.
    pub correct_fee_recipient: Option<bool>,
}

impl SlotRecord {
    /// A block is vanilla exactly when no relay reported a reward for it.
    pub fn is_vanilla(&self) -> bool {
        self.mev_reward.is_none()
    }
}

/// Relay details reported by the block explorer for one slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayMetadata {
    /// Relay tag retained by the explorer.
    pub relay_tag: String,
    /// Fee recipient the relay reported for the producer.
    pub producer_fee_recipient: String,
    /// Total MEV reward reported for the block, in ETH.
    pub block_mev_reward: f64,
}

/// Resolved state of one slot in the relay cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayResolution {
    /// The explorer saw no relay for the block.
    NoRelay,
    /// A relay was involved.
    Relayed(RelayMetadata),
}

impl RelayResolution {
    pub fn relay_tag(&self) -> Option<&str> {
        match self {
            RelayResolution::NoRelay => None,
            RelayResolution::Relayed(meta) => Some(meta.relay_tag.as_str()),
        }
    }
}

/// One point of the pool's exchange-rate ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    /// Execution block number.
    pub block: u64,
    /// Total ETH backing the pool token, in ETH.
    pub total_eth: f64,
    /// ETH currently staking, in ETH.
    pub staking_eth: f64,
    /// Pool token supply.
    pub reth_supply: f64,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Loss from a MEV-boost block that paid the wrong fee recipient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MevRecipientLoss {
    pub slot: u64,
    pub node_address: String,
    pub mev_reward: f64,
    pub reth_portion: f64,
    pub lost_eth: f64,
}

/// Which estimate produced a vanilla slot's loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VanillaLossBranch {
    /// Wrong fee recipient; worst case of the other estimates plus priority fees.
    BadRecipient,
    /// Correct recipient and a known bid.
    BidEstimate,
    /// Correct recipient, no bid; bid taken from neighboring slots.
    NobidNeighborEstimate,
    /// Correct recipient, no bid and no neighbors; bid taken from the dataset mean.
    NobidAvgEstimate,
}

impl VanillaLossBranch {
    pub const ALL: [VanillaLossBranch; 4] = [
        VanillaLossBranch::BadRecipient,
        VanillaLossBranch::BidEstimate,
        VanillaLossBranch::NobidNeighborEstimate,
        VanillaLossBranch::NobidAvgEstimate,
    ];

    /// Column name used in result tables.
    pub fn column(&self) -> &'static str {
        match self {
            VanillaLossBranch::BadRecipient => "lost_eth_bad_recipient",
            VanillaLossBranch::BidEstimate => "lost_eth_bid_estimate",
            VanillaLossBranch::NobidNeighborEstimate => "lost_eth_nobid_neighborestimate",
            VanillaLossBranch::NobidAvgEstimate => "lost_eth_nobid_avgestimate",
        }
    }
}

/// Estimated loss for one vanilla pool slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VanillaLossRecord {
    pub slot: u64,
    pub node_address: String,
    pub max_bid: Option<f64>,
    pub priority_fees: f64,
    pub reth_portion: f64,
    pub branch: VanillaLossBranch,
    /// Estimated loss; negative when captured priority fees beat the estimate.
    pub lost_eth: f64,
    /// Neighbor-window estimate, kept for correct-recipient slots without a bid.
    pub neighbor_estimate: Option<f64>,
    /// Dataset-average estimate, kept for correct-recipient slots without a bid.
    pub avg_estimate: Option<f64>,
}

impl VanillaLossRecord {
    /// Loss columns in [`VanillaLossBranch::ALL`] order; exactly one is populated.
    pub fn loss_columns(&self) -> [Option<f64>; 4] {
        VanillaLossBranch::ALL.map(|branch| (branch == self.branch).then_some(self.lost_eth))
    }
}

/// A vanilla slot removed because a relay was involved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedSlot {
    pub slot: u64,
    pub node_address: String,
    pub relay_tag: String,
    pub producer_fee_recipient: String,
    pub expected_fee_recipient: String,
    pub correct_fee_recipient: bool,
    /// `reth_portion * block_mev_reward` when the recipient was wrong, else zero.
    pub lost_eth: f64,
}

/// A pool slot with no usable bid, left out of the bid distributions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnplottedSlot {
    pub slot: u64,
    pub node_address: String,
    pub is_vanilla: bool,
    pub correct_fee_recipient: Option<bool>,
}
