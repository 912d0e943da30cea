//! ETH totals, weekly rates and annualized-yield counterfactuals.

use eyre::{eyre, Result};
use rp_data::types::ExchangeSnapshot;
use serde::Serialize;

use crate::config::{slot_to_timestamp, SECONDS_PER_SLOT, SECONDS_PER_YEAR};

/// Largest losses listed per category.
pub const TOP_LOSSES: usize = 5;

/// Snapshot closest in time to `target`.
///
/// Ledgers are ordered by time, so the scan stops at the first snapshot past
/// the target. Ties keep the earlier snapshot.
pub fn nearest_snapshot(snapshots: &[ExchangeSnapshot], target: u64) -> Option<&ExchangeSnapshot> {
    let mut best: Option<(&ExchangeSnapshot, u64)> = None;
    for snapshot in snapshots {
        let diff = snapshot.timestamp.abs_diff(target);
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((snapshot, diff));
        }
        if snapshot.timestamp > target {
            break;
        }
    }
    best.map(|(snapshot, _)| snapshot)
}

/// Exchange rate at both ends of the analysis window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RethWindow {
    pub start_eth: f64,
    pub start_reth: f64,
    pub end_eth: f64,
    pub end_reth: f64,
    pub years: f64,
}

impl RethWindow {
    /// Annualized yield in percent.
    pub fn apy(&self) -> f64 {
        100.0 * (self.end_eth / self.end_reth - self.start_eth / self.start_reth) / self.years
    }

    /// Same window with `eth` more backing at the end.
    pub fn with_added_eth(&self, eth: f64) -> Self {
        Self {
            end_eth: self.end_eth + eth,
            ..*self
        }
    }
}

/// Builds the window between two slots from the exchange-rate ledger.
///
/// # Errors
/// Returns error if the ledger is empty, the range is empty, or a snapshot
/// reports zero token supply.
pub fn reth_window(snapshots: &[ExchangeSnapshot], start_slot: u64, end_slot: u64) -> Result<RethWindow> {
    if end_slot <= start_slot {
        return Err(eyre!("empty slot range {start_slot}..{end_slot}"));
    }
    let start = nearest_snapshot(snapshots, slot_to_timestamp(start_slot))
        .ok_or_else(|| eyre!("exchange-rate ledger is empty"))?;
    let end = nearest_snapshot(snapshots, slot_to_timestamp(end_slot))
        .ok_or_else(|| eyre!("exchange-rate ledger is empty"))?;

    for snapshot in [start, end] {
        if snapshot.reth_supply <= 0.0 {
            return Err(eyre!(
                "ledger snapshot at block {} has no token supply",
                snapshot.block
            ));
        }
    }

    let years = ((end_slot - start_slot) * SECONDS_PER_SLOT) as f64 / SECONDS_PER_YEAR;
    Ok(RethWindow {
        start_eth: start.total_eth,
        start_reth: start.reth_supply,
        end_eth: end.total_eth,
        end_reth: end.reth_supply,
        years,
    })
}

/// Actual versus loss-free yield.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct YieldImpact {
    pub actual_apy: f64,
    pub counterfactual_apy: f64,
    /// Share of the loss-free yield that was lost, in percent.
    pub performance_hit_pct: f64,
}

impl YieldImpact {
    pub fn new(window: &RethWindow, lost_eth: f64) -> Self {
        let actual_apy = window.apy();
        let counterfactual_apy = window.with_added_eth(lost_eth).apy();
        Self {
            actual_apy,
            counterfactual_apy,
            performance_hit_pct: 100.0 * (1.0 - actual_apy / counterfactual_apy),
        }
    }
}

/// Headline figures for one loss category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LossSummary {
    pub category: String,
    pub slots: usize,
    pub total_eth: f64,
    pub eth_per_week: f64,
    /// Largest individual losses, descending.
    pub top_losses: Vec<f64>,
    pub impact: YieldImpact,
}

impl LossSummary {
    pub fn new(category: &str, losses: &[f64], weeks: f64, window: &RethWindow) -> Self {
        let total_eth: f64 = losses.iter().sum();
        let mut top_losses = losses.to_vec();
        top_losses.sort_by(|a, b| b.total_cmp(a));
        top_losses.truncate(TOP_LOSSES);

        Self {
            category: category.to_string(),
            slots: losses.len(),
            total_eth,
            eth_per_week: if weeks > 0.0 { total_eth / weeks } else { 0.0 },
            top_losses,
            impact: YieldImpact::new(window, total_eth),
        }
    }
}
