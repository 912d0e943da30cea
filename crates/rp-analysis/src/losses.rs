//! Per-slot loss attribution.
//!
//! Two populations of pool slots are scored:
//!
//! - MEV-boost slots with a wrong fee recipient lose the pool's share of the
//!   relay reward.
//! - Vanilla slots lose the reward a relay would have paid, net of the
//!   priority fees the block captured anyway. The expected relay reward comes
//!   from the slot's own bid when known, otherwise from neighboring slots'
//!   bids, otherwise from the dataset mean bid. With a wrong recipient the
//!   priority fees were lost too, so they are added back on top of the worst
//!   case estimate.
//!
//! Every vanilla slot ends up in exactly one [`VanillaLossBranch`]. Only the
//! bid and neighbor estimates count toward the correct-recipient totals; slots
//! left with the dataset-mean estimate are reported but not summed. Losses are
//! estimates and may be negative; they are never clamped.

use eyre::{eyre, Result};
use rp_data::types::{MevRecipientLoss, SlotRecord, VanillaLossBranch, VanillaLossRecord};
use std::collections::BTreeMap;
use tracing::info;

/// Pool share of a MEV-boost reward sent to the wrong recipient.
pub fn mev_recipient_loss(mev_reward: f64, reth_portion: f64) -> f64 {
    mev_reward * reth_portion
}

/// Expected relay reward net of captured priority fees, pool share.
pub fn bid_estimate_loss(max_bid: f64, bid_ratio: f64, priority_fees: f64, reth_portion: f64) -> f64 {
    (max_bid * bid_ratio - priority_fees) * reth_portion
}

/// Worst of the correct-recipient estimates plus the lost priority fees.
///
/// Returns `None` if no estimate is available.
pub fn bad_recipient_loss(
    candidates: &[Option<f64>],
    priority_fees: f64,
    reth_portion: f64,
) -> Option<f64> {
    candidates
        .iter()
        .flatten()
        .copied()
        .reduce(f64::max)
        .map(|worst| worst + priority_fees * reth_portion)
}

/// Centered rolling mean that skips missing values.
///
/// Position `i` averages the present values in `[i - window/2, i + (window-1)/2]`
/// (clipped at the edges) and is `None` when fewer than `min_samples` are present.
pub fn centered_rolling_mean(
    values: &[Option<f64>],
    window: usize,
    min_samples: usize,
) -> Vec<Option<f64>> {
    let before = window / 2;
    let after = window.saturating_sub(1) / 2;
    let min_samples = min_samples.max(1);

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(values.len());
            let present: Vec<f64> = values[lo..hi].iter().flatten().copied().collect();
            (present.len() >= min_samples)
                .then(|| present.iter().sum::<f64>() / present.len() as f64)
        })
        .collect()
}

/// MEV-boost pool slots split by recipient correctness.
#[derive(Clone, Debug, Default)]
pub struct MevBoostLosses {
    pub total_slots: usize,
    pub correct_slots: usize,
    pub wrong: Vec<MevRecipientLoss>,
}

impl MevBoostLosses {
    pub fn total_lost_eth(&self) -> f64 {
        self.wrong.iter().map(|w| w.lost_eth).sum()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.wrong.iter().map(|w| w.lost_eth).collect()
    }

    pub fn wrong_recipient_nodes(&self) -> BTreeMap<String, usize> {
        let mut nodes = BTreeMap::new();
        for w in &self.wrong {
            *nodes.entry(w.node_address.clone()).or_default() += 1;
        }
        nodes
    }
}

/// Scores MEV-boost pool slots.
///
/// # Errors
/// Returns error if a MEV-boost pool slot has no recipient classification.
pub fn mev_boost_losses(records: &[SlotRecord]) -> Result<MevBoostLosses> {
    let mut out = MevBoostLosses::default();

    for record in records.iter().filter(|r| r.is_rocketpool) {
        let Some(mev_reward) = record.mev_reward else {
            continue;
        };
        out.total_slots += 1;
        match record.correct_fee_recipient {
            Some(true) => out.correct_slots += 1,
            Some(false) => out.wrong.push(MevRecipientLoss {
                slot: record.slot,
                node_address: record.node_address.clone(),
                mev_reward,
                reth_portion: record.reth_portion,
                lost_eth: mev_recipient_loss(mev_reward, record.reth_portion),
            }),
            None => {
                return Err(eyre!(
                    "MEV-boost pool slot {} has no fee recipient classification",
                    record.slot
                ))
            }
        }
    }

    if out.total_slots != out.correct_slots + out.wrong.len() {
        return Err(eyre!("MEV-boost slot counts do not add up"));
    }

    info!(
        slots = out.total_slots,
        wrong = out.wrong.len(),
        lost_eth = out.total_lost_eth(),
        "MEV-boost recipient losses"
    );
    Ok(out)
}

/// Vanilla pool slot losses with per-branch accessors.
#[derive(Clone, Debug, Default)]
pub struct VanillaLosses {
    pub records: Vec<VanillaLossRecord>,
}

impl VanillaLosses {
    pub fn count(&self, branch: VanillaLossBranch) -> usize {
        self.records.iter().filter(|r| r.branch == branch).count()
    }

    pub fn sum(&self, branch: VanillaLossBranch) -> f64 {
        self.records
            .iter()
            .filter(|r| r.branch == branch)
            .map(|r| r.lost_eth)
            .sum()
    }

    /// Losses from a wrong fee recipient.
    pub fn recipient_losses(&self) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.branch == VanillaLossBranch::BadRecipient)
            .map(|r| r.lost_eth)
            .collect()
    }

    /// Losses from not using a relay, correct recipient.
    ///
    /// Slots estimated from the dataset mean alone are left out.
    pub fn non_recipient_losses(&self) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| {
                matches!(
                    r.branch,
                    VanillaLossBranch::BidEstimate | VanillaLossBranch::NobidNeighborEstimate
                )
            })
            .map(|r| r.lost_eth)
            .collect()
    }

    /// Sums of the neighbor and dataset-mean estimates over correct-recipient
    /// slots without a bid. Each sum covers every slot its estimate exists for.
    ///
    /// A neighbor sum well above the average sum means vanilla blocks cluster
    /// in high-bid periods.
    pub fn nobid_estimate_sums(&self) -> (f64, f64) {
        self.records.iter().fold((0.0, 0.0), |(n, a), r| {
            (
                n + r.neighbor_estimate.unwrap_or(0.0),
                a + r.avg_estimate.unwrap_or(0.0),
            )
        })
    }

    pub fn node_counts(&self, wrong_recipient: bool) -> BTreeMap<String, usize> {
        let mut nodes = BTreeMap::new();
        for r in &self.records {
            if (r.branch == VanillaLossBranch::BadRecipient) == wrong_recipient {
                *nodes.entry(r.node_address.clone()).or_default() += 1;
            }
        }
        nodes
    }
}

/// Estimates the loss of every vanilla pool slot.
///
/// `records` must be the whole dataset in slot order: neighbor bids and the
/// dataset mean bid are taken from every record, not only pool slots.
///
/// # Errors
/// Returns error if a vanilla pool slot is unclassified, or if no estimate can
/// be formed because the dataset has no bids at all.
pub fn vanilla_losses(
    records: &[SlotRecord],
    bid_ratio: f64,
    window: usize,
    min_samples: usize,
) -> Result<VanillaLosses> {
    let bids: Vec<Option<f64>> = records.iter().map(|r| r.max_bid).collect();
    let neighbor_bids = centered_rolling_mean(&bids, window, min_samples);

    let known: Vec<f64> = bids.iter().flatten().copied().collect();
    let mean_bid = (!known.is_empty()).then(|| known.iter().sum::<f64>() / known.len() as f64);

    let mut out = VanillaLosses::default();
    for (record, neighbor_bid) in records.iter().zip(neighbor_bids) {
        if !(record.is_vanilla() && record.is_rocketpool) {
            continue;
        }
        let correct = record.correct_fee_recipient.ok_or_else(|| {
            eyre!(
                "vanilla pool slot {} has no fee recipient classification",
                record.slot
            )
        })?;

        let estimate = |bid: f64| {
            bid_estimate_loss(bid, bid_ratio, record.priority_fees, record.reth_portion)
        };
        let bid_estimate = record.max_bid.map(estimate);
        let (neighbor_estimate, avg_estimate) = match record.max_bid {
            Some(_) => (None, None),
            None => (neighbor_bid.map(estimate), mean_bid.map(estimate)),
        };

        let selected = if !correct {
            bad_recipient_loss(
                &[bid_estimate, neighbor_estimate, avg_estimate],
                record.priority_fees,
                record.reth_portion,
            )
            .map(|loss| (VanillaLossBranch::BadRecipient, loss))
        } else if let Some(loss) = bid_estimate {
            Some((VanillaLossBranch::BidEstimate, loss))
        } else if let Some(loss) = neighbor_estimate {
            Some((VanillaLossBranch::NobidNeighborEstimate, loss))
        } else {
            avg_estimate.map(|loss| (VanillaLossBranch::NobidAvgEstimate, loss))
        };

        let (branch, lost_eth) = selected
            .ok_or_else(|| eyre!("no bid estimate available for vanilla slot {}", record.slot))?;
        if !lost_eth.is_finite() {
            return Err(eyre!(
                "non-finite loss {lost_eth} for vanilla slot {}",
                record.slot
            ));
        }

        let keep_cross_check = correct && record.max_bid.is_none();
        out.records.push(VanillaLossRecord {
            slot: record.slot,
            node_address: record.node_address.clone(),
            max_bid: record.max_bid,
            priority_fees: record.priority_fees,
            reth_portion: record.reth_portion,
            branch,
            lost_eth,
            neighbor_estimate: neighbor_estimate.filter(|_| keep_cross_check),
            avg_estimate: avg_estimate.filter(|_| keep_cross_check),
        });
    }

    let (neighbor_sum, avg_sum) = out.nobid_estimate_sums();
    info!(
        slots = out.records.len(),
        bad_recipient = out.count(VanillaLossBranch::BadRecipient),
        bid_estimate = out.count(VanillaLossBranch::BidEstimate),
        neighbor_estimate = out.count(VanillaLossBranch::NobidNeighborEstimate),
        avg_estimate = out.count(VanillaLossBranch::NobidAvgEstimate),
        neighbor_sum,
        avg_sum,
        "vanilla losses"
    );
    Ok(out)
}
