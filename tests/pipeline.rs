//! End-to-end runs of the loss analysis with an in-process relay lookup.

mod common;

use common::*;
use rp_analysis::config::PENALTY_START_SLOT;
use rp_analysis::pipeline::{self, AnalysisInput, ALL_LOSSES, MEV_WRONG_RECIPIENT};
use rp_data::relay_cache::RelayCache;
use rp_data::types::{RawSlotRecord, VanillaLossBranch};
use std::collections::HashMap;

const S: u64 = PENALTY_START_SLOT;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Eight slots in the window and one before it:
///
/// - `S+0` MEV-boost, correct recipient
/// - `S+1` MEV-boost, node B paying the wrong address
/// - `S+2` vanilla, correct recipient, no bid
/// - `S+3` vanilla, node B paying the wrong address, bid 1.0
/// - `S+4` vanilla, but the explorer saw a relay paying the wrong address
/// - `S+5` non-pool MEV-boost
/// - `S+6` no block
/// - `S+7` MEV-boost through a relay that drops bids
fn dataset() -> Vec<RawSlotRecord> {
    vec![
        RawSlotRecord {
            slot: S - 10,
            ..pool_slot(0)
        },
        mev_slot(0, Some(1.0), 0.9, "Flashbots"),
        of_node_b(mev_slot(1, Some(2.0), 1.8, "Flashbots"), WRONG_RECIPIENT),
        pool_slot(2),
        of_node_b(
            RawSlotRecord {
                max_bid: Some(1.0),
                ..pool_slot(3)
            },
            WRONG_RECIPIENT,
        ),
        pool_slot(4),
        RawSlotRecord {
            is_rocketpool: false,
            node_address: "0xsolo".to_string(),
            fee_recipient: Some("0xsolo".to_string()),
            ..mev_slot(5, Some(1.0), 0.95, "Flashbots")
        },
        RawSlotRecord {
            proposer_index: None,
            ..pool_slot(6)
        },
        mev_slot(7, None, 0.9, "bloXroute Max Profit"),
    ]
}

fn input(records: Vec<RawSlotRecord>) -> AnalysisInput {
    AnalysisInput {
        records,
        start_slot: S - 100,
        end_slot: S + 100,
        ledger: ledger(S, S + 100),
        distributors: distributors(),
    }
}

fn explorer() -> StaticLookup {
    StaticLookup::new(HashMap::from([(
        S + 4,
        relayed("Ultra Sound", WRONG_RECIPIENT, 0.5),
    )]))
}

#[tokio::test]
async fn full_run_attributes_every_loss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = RelayCache::open(dir.path().join("relay_cache.json")).expect("cache");
    let lookup = explorer();

    let report = pipeline::run(input(dataset()), &fast_config(), &mut cache, &lookup)
        .await
        .expect("analysis should succeed");

    assert_eq!(report.coverage.start_slot, S, "start clamps to the penalty start");
    assert_eq!(report.normalize.loaded, 9);
    assert_eq!(report.normalize.in_window, 8);
    assert_eq!(report.normalize.missing_proposer, 1);
    assert!(approx(report.coverage.pct_of_range, 800.0 / 101.0), "window is inclusive");

    let ratio = (0.9 + 0.9 + 0.95) / 3.0;
    assert!(approx(report.bid_ratio.mean, ratio));
    assert_eq!(report.imputation.imputed, 1);
    assert_eq!(report.imputation.known_relay_gap, 1);

    // only vanilla pool slots are looked up
    assert_eq!(lookup.calls(), 3);
    assert_eq!(report.relay_filter.removed.len(), 1);
    let removed = &report.relay_filter.removed[0];
    assert_eq!(removed.slot, S + 4);
    assert!(!removed.correct_fee_recipient);
    assert!(approx(report.relay_filter.removed_wrong_recipient_eth, 0.45 * 0.5));

    assert_eq!(report.mev_losses.total_slots, 3);
    assert_eq!(report.mev_losses.wrong.len(), 1);
    assert!(approx(report.mev_losses.total_lost_eth(), 1.8 * 0.45));

    let vanilla = &report.vanilla_losses.records;
    assert_eq!(vanilla.len(), 2);
    assert_eq!(vanilla[0].slot, S + 2);
    assert_eq!(vanilla[0].branch, VanillaLossBranch::NobidNeighborEstimate);
    assert!(vanilla[0].avg_estimate.is_some());
    assert_eq!(vanilla[1].slot, S + 3);
    assert_eq!(vanilla[1].branch, VanillaLossBranch::BadRecipient);
    // (1.0 * ratio - 0.01) * 0.45 + 0.01 * 0.45
    assert!(approx(vanilla[1].lost_eth, ratio * 0.45));
    for row in vanilla {
        assert_eq!(row.loss_columns().iter().flatten().count(), 1);
    }

    let mev = report.summary(MEV_WRONG_RECIPIENT).expect("mev summary");
    assert!(approx(mev.total_eth, 0.81));
    let all = report.summary(ALL_LOSSES).expect("total summary");
    let expected_total: f64 = 0.81 + vanilla.iter().map(|r| r.lost_eth).sum::<f64>();
    assert!(approx(all.total_eth, expected_total));
    assert!(all.impact.counterfactual_apy > all.impact.actual_apy);

    assert_eq!(report.node_issues.mev_wrong_recipient.get(NODE_B), Some(&1));
    assert_eq!(report.node_issues.vanilla_wrong_recipient.get(NODE_B), Some(&1));
    assert_eq!(report.node_issues.removed_wrong_recipient.get(NODE_A), Some(&1));
    assert_eq!(report.node_issues.no_bid.get(NODE_A), Some(&1));

    let store = test_store();
    store
        .replace_mev_recipient_losses(&report.mev_losses.wrong)
        .expect("mev rows");
    store
        .replace_vanilla_losses(&report.vanilla_losses.records)
        .expect("vanilla rows");
    store
        .replace_removed_slots(&report.relay_filter.removed)
        .expect("removed rows");
    for dist in &report.distributions {
        store
            .replace_unplotted_slots(dist.variant.as_str(), &dist.unplotted)
            .expect("unplotted rows");
    }
    assert_eq!(store.count_rows("mev_recipient_losses").expect("count"), 1);
    assert_eq!(store.count_rows("vanilla_losses").expect("count"), 2);
    assert_eq!(store.count_rows("removed_slots").expect("count"), 1);
    assert_eq!(store.count_rows("unplotted_slots").expect("count"), 1);
}

#[tokio::test]
async fn rerun_with_full_cache_makes_no_lookups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache_path = dir.path().join("relay_cache.json");

    let first = {
        let mut cache = RelayCache::open(&cache_path).expect("cache");
        pipeline::run(input(dataset()), &fast_config(), &mut cache, &explorer())
            .await
            .expect("first run")
    };
    assert!(cache_path.exists(), "batch committed to the durable file");

    let mut cache = RelayCache::open(&cache_path).expect("reopen");
    let lookup = StaticLookup::new(HashMap::new());
    let second = pipeline::run(input(dataset()), &fast_config(), &mut cache, &lookup)
        .await
        .expect("second run");

    assert_eq!(lookup.calls(), 0);
    assert_eq!(first.relay_filter.removed, second.relay_filter.removed);
    assert_eq!(first.vanilla_losses.records, second.vanilla_losses.records);
}

#[tokio::test]
async fn unmapped_node_aborts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = RelayCache::open(dir.path().join("relay_cache.json")).expect("cache");

    let mut input = input(dataset());
    input.distributors.remove(NODE_B);

    let result = pipeline::run(input, &fast_config(), &mut cache, &explorer()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn duplicate_slots_abort_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = RelayCache::open(dir.path().join("relay_cache.json")).expect("cache");

    let mut records = dataset();
    records.push(pool_slot(2));

    let result = pipeline::run(input(records), &fast_config(), &mut cache, &explorer()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn explorer_outage_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache_path = dir.path().join("relay_cache.json");
    let mut cache = RelayCache::open(&cache_path).expect("cache");

    let result = pipeline::run(input(dataset()), &fast_config(), &mut cache, &DownLookup).await;
    assert!(result.is_err());
    assert!(!cache_path.exists(), "nothing committed after an aborted batch");
}
