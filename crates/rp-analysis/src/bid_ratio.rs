//! Bid-to-reward ratio estimation.
//!
//! The reward a relay reports is usually a little below the best bid seen for
//! the slot (late bids, relay cuts). The ratio moves slowly, so a single mean
//! over the run's dataset is used everywhere a bid has to be converted into
//! an expected reward.

use eyre::{eyre, Result};
use rp_data::types::SlotRecord;
use serde::Serialize;
use tracing::info;

/// Dataset-wide estimate of `mev_reward / max_bid`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BidRatio {
    /// Arithmetic mean; the value used for estimation.
    pub mean: f64,
    /// Reported for comparison only.
    pub median: f64,
    pub samples: usize,
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Estimates the ratio over every record with both a reward and a positive bid.
///
/// # Errors
/// Returns error if no record carries both values.
pub fn estimate_bid_ratio(records: &[SlotRecord]) -> Result<BidRatio> {
    let mut ratios: Vec<f64> = records
        .iter()
        .filter_map(|r| match (r.mev_reward, r.max_bid) {
            (Some(reward), Some(bid)) if bid > 0.0 => Some(reward / bid),
            _ => None,
        })
        .filter(|ratio| ratio.is_finite())
        .collect();

    if ratios.is_empty() {
        return Err(eyre!(
            "cannot estimate bid-to-reward ratio: no slot has both a reward and a bid"
        ));
    }

    let samples = ratios.len();
    let mean = ratios.iter().sum::<f64>() / samples as f64;
    let median = median(&mut ratios);

    info!(mean, median, samples, "bid-to-reward ratio");

    Ok(BidRatio {
        mean,
        median,
        samples,
    })
}
