//! Missing-bid imputation for MEV-boost slots.
//!
//! A slot with a relay reward but no bid, or a bid below the reward, has a gap
//! in the bid archive. The bid is reconstructed from the reward and the
//! dataset-wide bid-to-reward ratio.

use rp_data::types::SlotRecord;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Winning bids below this share of the reward are flagged on relays that
/// are not known to drop bids.
const LOW_WINNING_BID_PCT: f64 = 90.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImputeReport {
    /// Slots whose bid was filled in.
    pub imputed: usize,
    /// Of those, slots reported by a relay known to drop bids.
    pub known_relay_gap: usize,
    /// Slots without any bid from other relays (anomalous).
    pub anomalous_missing: Vec<u64>,
    /// Slots whose recorded bid sits well below the reward (anomalous).
    pub anomalous_low_bid: Vec<u64>,
}

fn needs_imputation(record: &SlotRecord) -> bool {
    match (record.mev_reward, record.max_bid) {
        (Some(_), None) => true,
        (Some(reward), Some(bid)) => bid < reward,
        (None, _) => false,
    }
}

/// Fills bid gaps with `mev_reward / bid_ratio`.
///
/// Every slot that meets the trigger is imputed, even when its relay is not a
/// known gap source; those are logged instead. Re-running over the output with
/// the same ratio (at most 1) changes nothing.
pub fn impute_missing_bids(
    records: Vec<SlotRecord>,
    bid_ratio: f64,
    gap_prone_relays: &[String],
) -> (Vec<SlotRecord>, ImputeReport) {
    let mut report = ImputeReport::default();

    let records = records
        .into_iter()
        .map(|record| {
            if !needs_imputation(&record) {
                return record;
            }
            let Some(reward) = record.mev_reward else {
                return record;
            };

            let known_gap = record
                .mev_reward_relay
                .as_deref()
                .is_some_and(|relay| gap_prone_relays.iter().any(|r| r == relay));

            if known_gap {
                report.known_relay_gap += 1;
            } else {
                match record.max_bid {
                    None => {
                        warn!(
                            slot = record.slot,
                            relay = record.mev_reward_relay.as_deref().unwrap_or("none"),
                            mev_reward = reward,
                            "missing bid from a relay not known to drop bids"
                        );
                        report.anomalous_missing.push(record.slot);
                    }
                    Some(bid) => {
                        let pct = 100.0 * bid / reward;
                        if pct < LOW_WINNING_BID_PCT {
                            warn!(
                                slot = record.slot,
                                relay = record.mev_reward_relay.as_deref().unwrap_or("none"),
                                pct,
                                "max_bid well below mev_reward"
                            );
                            report.anomalous_low_bid.push(record.slot);
                        }
                    }
                }
            }

            let imputed = reward / bid_ratio;
            debug!(slot = record.slot, previous = ?record.max_bid, imputed, "imputing max_bid");
            report.imputed += 1;
            SlotRecord {
                max_bid: Some(imputed),
                ..record
            }
        })
        .collect();

    info!(
        imputed = report.imputed,
        known_relay_gap = report.known_relay_gap,
        anomalous = report.anomalous_missing.len(),
        low_bid = report.anomalous_low_bid.len(),
        "filled in proxy max_bids"
    );

    (records, report)
}
