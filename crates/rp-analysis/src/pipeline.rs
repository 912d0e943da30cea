//! End-to-end loss analysis over one run's dataset.
//!
//! Stages run in a fixed order, each taking the previous stage's records by
//! value and handing back a new collection:
//!
//! normalize -> bid ratio -> impute -> relay filter -> recipients -> losses
//!
//! Any stage error aborts the run before a report exists. The relay cache is
//! the only state that survives a failed run.

use eyre::{eyre, Result, WrapErr};
use rp_data::beaconchain::RelayLookup;
use rp_data::relay_cache::RelayCache;
use rp_data::types::{ExchangeSnapshot, RawSlotRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::bid_ratio::{estimate_bid_ratio, BidRatio};
use crate::config::{slots_to_weeks, AnalysisConfig};
use crate::distribution::{bid_distributions, BidDistributions, BidVariant};
use crate::impute::{impute_missing_bids, ImputeReport};
use crate::losses::{mev_boost_losses, vanilla_losses, MevBoostLosses, VanillaLosses};
use crate::normalize::{normalize, NormalizeReport};
use crate::recipient::{classify_recipients, RecipientBook};
use crate::relay_filter::{filter_relay_tagged, RelayFilterOutcome};
use crate::yield_impact::{reth_window, LossSummary, RethWindow};

pub const MEV_WRONG_RECIPIENT: &str = "MEV-boost, wrong recipient";
pub const VANILLA_WRONG_RECIPIENT: &str = "vanilla, wrong recipient";
pub const VANILLA_NON_RECIPIENT: &str = "vanilla, correct recipient";
pub const ALL_LOSSES: &str = "all attributable";

/// Everything a run reads.
#[derive(Clone, Debug, Default)]
pub struct AnalysisInput {
    pub records: Vec<RawSlotRecord>,
    /// First slot covered by the snapshot files.
    pub start_slot: u64,
    /// Last slot covered by the snapshot files.
    pub end_slot: u64,
    pub ledger: Vec<ExchangeSnapshot>,
    /// Node address to fee distributor address.
    pub distributors: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Coverage {
    pub start_slot: u64,
    pub end_slot: u64,
    /// Weeks of slots at or after the start slot.
    pub weeks: f64,
    /// Share of the slot range present in the data, in percent.
    pub pct_of_range: f64,
}

/// Per-node counts of affected slots.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NodeIssues {
    pub mev_wrong_recipient: BTreeMap<String, usize>,
    pub vanilla_wrong_recipient: BTreeMap<String, usize>,
    pub removed_wrong_recipient: BTreeMap<String, usize>,
    pub vanilla_correct_recipient: BTreeMap<String, usize>,
    /// Pool slots with no bid at all.
    pub no_bid: BTreeMap<String, usize>,
}

/// Sums of the two estimates for correct-recipient vanilla slots without a bid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NobidCrossCheck {
    pub neighbor_estimate_eth: f64,
    pub avg_estimate_eth: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub coverage: Coverage,
    pub normalize: NormalizeReport,
    pub bid_ratio: BidRatio,
    pub imputation: ImputeReport,
    pub relay_filter: RelayFilterOutcome,
    pub window: RethWindow,
    pub summaries: Vec<LossSummary>,
    pub nobid_cross_check: NobidCrossCheck,
    pub node_issues: NodeIssues,
    pub distributions: Vec<BidDistributions>,
    #[serde(skip)]
    pub mev_losses: MevBoostLosses,
    #[serde(skip)]
    pub vanilla_losses: VanillaLosses,
}

impl AnalysisReport {
    pub fn summary(&self, category: &str) -> Option<&LossSummary> {
        self.summaries.iter().find(|s| s.category == category)
    }
}

/// Runs every stage over `input`.
///
/// The slot range starts no earlier than the configured penalty start slot.
///
/// # Errors
/// Returns error on any fatal stage condition: duplicate slots, no bid/reward
/// pairs, missing distributor mappings, exhausted lookup retries, unclassified
/// pool slots or an unusable exchange-rate ledger.
#[tracing::instrument(skip_all, fields(start = input.start_slot, end = input.end_slot))]
pub async fn run<L: RelayLookup>(
    input: AnalysisInput,
    config: &AnalysisConfig,
    cache: &mut RelayCache,
    lookup: &L,
) -> Result<AnalysisReport> {
    let start_slot = input.start_slot.max(config.penalty_start_slot);
    let end_slot = input.end_slot;
    if end_slot <= start_slot {
        return Err(eyre!(
            "snapshot range ends at slot {end_slot}, before the start slot {start_slot}"
        ));
    }
    let window = reth_window(&input.ledger, start_slot, end_slot)
        .wrap_err("failed to read the exchange rate at the range boundaries")?;

    let (records, normalize_report) = normalize(input.records, config)?;
    let bid_ratio = estimate_bid_ratio(&records)?;
    let (records, imputation) =
        impute_missing_bids(records, bid_ratio.mean, &config.gap_prone_relays);

    let book = RecipientBook::new(&config.smoothing_pool_address, input.distributors);
    let mut relay_filter =
        filter_relay_tagged(records, cache, lookup, &book, &config.relay_filter)
            .await
            .wrap_err("relay compliance filter failed")?;
    let records = classify_recipients(std::mem::take(&mut relay_filter.kept), &book)?;

    let mev_losses = mev_boost_losses(&records)?;
    let vanilla_losses = vanilla_losses(
        &records,
        bid_ratio.mean,
        config.neighbor_window,
        config.neighbor_min_samples,
    )?;

    let weeks = slots_to_weeks(normalize_report.in_window as u64);
    let coverage = Coverage {
        start_slot,
        end_slot,
        weeks,
        pct_of_range: 100.0 * normalize_report.in_window as f64 / (end_slot - start_slot + 1) as f64,
    };

    let mev = mev_losses.losses();
    let bad = vanilla_losses.recipient_losses();
    let non = vanilla_losses.non_recipient_losses();
    let all: Vec<f64> = mev.iter().chain(&bad).chain(&non).copied().collect();
    let summaries = vec![
        LossSummary::new(MEV_WRONG_RECIPIENT, &mev, weeks, &window),
        LossSummary::new(VANILLA_WRONG_RECIPIENT, &bad, weeks, &window),
        LossSummary::new(VANILLA_NON_RECIPIENT, &non, weeks, &window),
        LossSummary::new(ALL_LOSSES, &all, weeks, &window),
    ];

    let (neighbor_estimate_eth, avg_estimate_eth) = vanilla_losses.nobid_estimate_sums();

    let distributions: Vec<BidDistributions> = [BidVariant::Raw, BidVariant::Filled]
        .into_iter()
        .map(|variant| {
            bid_distributions(
                &records,
                variant,
                config.neighbor_window,
                config.neighbor_min_samples,
            )
        })
        .collect();

    let mut no_bid = BTreeMap::new();
    if let Some(raw) = distributions.iter().find(|d| d.variant == BidVariant::Raw) {
        for slot in &raw.unplotted {
            *no_bid.entry(slot.node_address.clone()).or_default() += 1;
        }
    }
    let node_issues = NodeIssues {
        mev_wrong_recipient: mev_losses.wrong_recipient_nodes(),
        vanilla_wrong_recipient: vanilla_losses.node_counts(true),
        removed_wrong_recipient: relay_filter.wrong_recipient_nodes.clone(),
        vanilla_correct_recipient: vanilla_losses.node_counts(false),
        no_bid,
    };

    info!(
        weeks,
        pct_of_range = coverage.pct_of_range,
        total_lost_eth = summaries.last().map_or(0.0, |s| s.total_eth),
        "analysis complete"
    );

    Ok(AnalysisReport {
        coverage,
        normalize: normalize_report,
        bid_ratio,
        imputation,
        relay_filter,
        window,
        summaries,
        nobid_cross_check: NobidCrossCheck {
            neighbor_estimate_eth,
            avg_estimate_eth,
        },
        node_issues,
        distributions,
        mev_losses,
        vanilla_losses,
    })
}
