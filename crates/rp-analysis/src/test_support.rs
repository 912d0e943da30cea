//! Record builders shared by unit tests.

use rp_data::types::SlotRecord;

/// A vanilla pool slot with a correct recipient and no bid.
pub(crate) fn pool_slot(slot: u64) -> SlotRecord {
    SlotRecord {
        slot,
        node_address: "0xnode".to_string(),
        proposer_index: 1,
        is_rocketpool: true,
        in_smoothing_pool: false,
        avg_fee: 0.1,
        eth_collat_ratio: 2.0,
        max_bid: None,
        mev_reward: None,
        mev_reward_relay: None,
        priority_fees: 0.0,
        fee_recipient: None,
        reth_portion: 0.45,
        correct_fee_recipient: Some(true),
    }
}

pub(crate) fn with_bid(slot: u64, max_bid: Option<f64>, mev_reward: Option<f64>) -> SlotRecord {
    SlotRecord {
        max_bid,
        mev_reward,
        ..pool_slot(slot)
    }
}
