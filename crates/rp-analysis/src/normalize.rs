//! Record normalization: cutoff filtering, derived fields and the fee sanity check.

use eyre::{eyre, Result};
use rp_data::types::{RawSlotRecord, SlotRecord};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::AnalysisConfig;

/// Counts gathered while normalizing a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    /// Records handed in.
    pub loaded: usize,
    /// Records at or after the penalty start slot, including slots without a block.
    pub in_window: usize,
    /// Slots dropped because no block was produced.
    pub missing_proposer: usize,
    /// Slots dropped because a required economic field was missing or invalid.
    pub malformed: Vec<u64>,
    /// Slots whose commission exceeds the expected maximum (kept).
    pub fee_over_max: Vec<u64>,
    /// Slots whose commission is below the expected minimum (removed from the pool).
    pub fee_under_min: Vec<u64>,
}

/// Fraction of a slot's reward owed to pool token holders.
///
/// Lies in `[0, 1]` whenever `avg_fee` is in `[0, 1]` and `eth_collat_ratio >= 1`.
pub fn reth_portion(avg_fee: f64, eth_collat_ratio: f64) -> f64 {
    (1.0 - avg_fee) * (1.0 - 1.0 / eth_collat_ratio)
}

fn to_slot_record(raw: RawSlotRecord) -> Option<SlotRecord> {
    let proposer_index = raw.proposer_index?;
    let avg_fee = raw.avg_fee.filter(|f| f.is_finite())?;
    let eth_collat_ratio = raw.eth_collat_ratio.filter(|r| r.is_finite() && *r > 0.0)?;
    let priority_fees = raw.priority_fees.filter(|p| p.is_finite())?;

    Some(SlotRecord {
        slot: raw.slot,
        node_address: raw.node_address,
        proposer_index,
        is_rocketpool: raw.is_rocketpool,
        in_smoothing_pool: raw.in_smoothing_pool,
        avg_fee,
        eth_collat_ratio,
        max_bid: raw.max_bid,
        mev_reward: raw.mev_reward,
        mev_reward_relay: raw.mev_reward_relay,
        priority_fees,
        fee_recipient: raw.fee_recipient,
        reth_portion: reth_portion(avg_fee, eth_collat_ratio),
        correct_fee_recipient: None,
    })
}

/// Turns raw snapshot rows into ordered, validated slot records.
///
/// Rows before the penalty start slot and rows without a proposer are dropped.
/// The fee sanity check runs over the whole batch so out-of-range records are
/// reported together; records under the minimum fee stay in the dataset but
/// are no longer counted as pool blocks.
///
/// # Errors
/// Returns error if two rows share a slot.
pub fn normalize(
    raw: Vec<RawSlotRecord>,
    config: &AnalysisConfig,
) -> Result<(Vec<SlotRecord>, NormalizeReport)> {
    let mut report = NormalizeReport {
        loaded: raw.len(),
        ..Default::default()
    };

    let mut records = Vec::with_capacity(raw.len());
    for row in raw {
        if row.slot < config.penalty_start_slot {
            continue;
        }
        report.in_window += 1;

        if row.proposer_index.is_none() {
            report.missing_proposer += 1;
            continue;
        }

        let slot = row.slot;
        match to_slot_record(row) {
            Some(record) => records.push(record),
            None => report.malformed.push(slot),
        }
    }

    records.sort_by_key(|r| r.slot);
    if let Some(pair) = records.windows(2).find(|pair| pair[0].slot == pair[1].slot) {
        return Err(eyre!("slot {} appears more than once in the input", pair[0].slot));
    }

    if !report.malformed.is_empty() {
        warn!(
            count = report.malformed.len(),
            slots = ?report.malformed,
            "dropping records with missing or invalid fee fields"
        );
    }

    for record in &mut records {
        if record.avg_fee > config.max_expected_fee {
            report.fee_over_max.push(record.slot);
        }
        if record.avg_fee < config.min_expected_fee {
            report.fee_under_min.push(record.slot);
            record.is_rocketpool = false;
        }
    }

    if !report.fee_over_max.is_empty() {
        warn!(
            count = report.fee_over_max.len(),
            slots = ?report.fee_over_max,
            max_expected_fee = config.max_expected_fee,
            "records with commission above the expected maximum"
        );
    }
    if !report.fee_under_min.is_empty() {
        error!(
            count = report.fee_under_min.len(),
            slots = ?report.fee_under_min,
            min_expected_fee = config.min_expected_fee,
            "records under the minimum commission (incomplete migration out of the pool); \
             excluding them from pool totals"
        );
    }

    info!(
        loaded = report.loaded,
        in_window = report.in_window,
        kept = records.len(),
        missing_proposer = report.missing_proposer,
        "records normalized"
    );

    Ok((records, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(slot: u64, avg_fee: f64) -> RawSlotRecord {
        RawSlotRecord {
            slot,
            node_address: "0xnode".to_string(),
            proposer_index: Some(7),
            is_rocketpool: true,
            avg_fee: Some(avg_fee),
            eth_collat_ratio: Some(2.0),
            priority_fees: Some(0.01),
            ..Default::default()
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            penalty_start_slot: 100,
            ..Default::default()
        }
    }

    #[test]
    fn reth_portion_within_unit_interval() {
        for fee in [0.05, 0.1, 0.14, 0.2] {
            for ratio in [1.0, 1.5, 2.0, 4.0, 32.0] {
                let portion = reth_portion(fee, ratio);
                assert!((0.0..=1.0).contains(&portion), "fee={fee} ratio={ratio}");
            }
        }
        assert!((reth_portion(0.1, 2.0) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn drops_pre_cutoff_and_blockless_slots() {
        let mut blockless = raw(102, 0.1);
        blockless.proposer_index = None;
        let input = vec![raw(99, 0.1), raw(101, 0.1), blockless, raw(100, 0.1)];

        let (records, report) = normalize(input, &config()).expect("normalize");
        assert_eq!(records.iter().map(|r| r.slot).collect::<Vec<_>>(), vec![100, 101]);
        assert_eq!(report.loaded, 4);
        assert_eq!(report.in_window, 3);
        assert_eq!(report.missing_proposer, 1);
    }

    #[test]
    fn fee_bounds_flag_and_reclassify() {
        let input = vec![raw(100, 0.25), raw(101, 0.02), raw(102, 0.14)];
        let (records, report) = normalize(input, &config()).expect("normalize");

        assert_eq!(report.fee_over_max, vec![100]);
        assert_eq!(report.fee_under_min, vec![101]);
        assert!(records[0].is_rocketpool, "over-max records are kept in the pool");
        assert!(!records[1].is_rocketpool);
        assert!(records[2].is_rocketpool);
    }

    #[test]
    fn vanilla_tracks_missing_reward() {
        let mut mev = raw(100, 0.1);
        mev.mev_reward = Some(0.3);
        let (records, _) = normalize(vec![mev, raw(101, 0.1)], &config()).expect("normalize");
        assert!(!records[0].is_vanilla());
        assert!(records[1].is_vanilla());
    }

    #[test]
    fn malformed_fee_fields_are_dropped() {
        let mut bad = raw(100, 0.1);
        bad.eth_collat_ratio = None;
        let (records, report) = normalize(vec![bad, raw(101, 0.1)], &config()).expect("normalize");
        assert_eq!(records.len(), 1);
        assert_eq!(report.malformed, vec![100]);
    }

    #[test]
    fn duplicate_slots_are_fatal() {
        assert!(normalize(vec![raw(100, 0.1), raw(100, 0.1)], &config()).is_err());
    }
}
