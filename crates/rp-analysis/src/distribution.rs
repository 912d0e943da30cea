//! Empirical survival curves of max bids, per slot category.

use rp_data::types::{SlotRecord, UnplottedSlot};
use serde::Serialize;

use crate::losses::centered_rolling_mean;

/// Points of the empirical survival function of `values`.
///
/// Starts at `(0, 1)` and steps down by `1/n` at every sorted value.
pub fn survival_function(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;

    let mut x = Vec::with_capacity(sorted.len() + 1);
    let mut y = Vec::with_capacity(sorted.len() + 1);
    x.push(0.0);
    y.push(1.0);
    for (i, value) in sorted.into_iter().enumerate() {
        x.push(value);
        y.push(1.0 - (i + 1) as f64 / n);
    }
    (x, y)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BidCategory {
    All,
    Pool,
    PoolMevGoodRecipient,
    PoolMevBadRecipient,
    PoolVanillaGoodRecipient,
    PoolVanillaBadRecipient,
    NonPoolVanilla,
}

impl BidCategory {
    pub const ALL: [BidCategory; 7] = [
        BidCategory::All,
        BidCategory::Pool,
        BidCategory::PoolMevGoodRecipient,
        BidCategory::PoolMevBadRecipient,
        BidCategory::PoolVanillaGoodRecipient,
        BidCategory::PoolVanillaBadRecipient,
        BidCategory::NonPoolVanilla,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BidCategory::All => "all",
            BidCategory::Pool => "pool",
            BidCategory::PoolMevGoodRecipient => "pool MEV-boost, correct recipient",
            BidCategory::PoolMevBadRecipient => "pool MEV-boost, wrong recipient",
            BidCategory::PoolVanillaGoodRecipient => "pool vanilla, correct recipient",
            BidCategory::PoolVanillaBadRecipient => "pool vanilla, wrong recipient",
            BidCategory::NonPoolVanilla => "non-pool vanilla",
        }
    }

    pub fn contains(&self, record: &SlotRecord) -> bool {
        let pool = record.is_rocketpool;
        let vanilla = record.is_vanilla();
        let correct = record.correct_fee_recipient;
        match self {
            BidCategory::All => true,
            BidCategory::Pool => pool,
            BidCategory::PoolMevGoodRecipient => pool && !vanilla && correct == Some(true),
            BidCategory::PoolMevBadRecipient => pool && !vanilla && correct == Some(false),
            BidCategory::PoolVanillaGoodRecipient => pool && vanilla && correct == Some(true),
            BidCategory::PoolVanillaBadRecipient => pool && vanilla && correct == Some(false),
            BidCategory::NonPoolVanilla => !pool && vanilla,
        }
    }
}

/// Whether missing bids were filled before building the curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BidVariant {
    Raw,
    Filled,
}

impl BidVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidVariant::Raw => "raw",
            BidVariant::Filled => "filled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SurvivalCurve {
    pub category: BidCategory,
    pub samples: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BidDistributions {
    pub variant: BidVariant,
    pub curves: Vec<SurvivalCurve>,
    /// Pool slots left out of every curve for lack of a bid.
    pub unplotted: Vec<UnplottedSlot>,
}

/// Bids per record, with gaps filled by the neighbor window and then the
/// mean of the neighbor-filled bids.
pub fn fill_bids(records: &[SlotRecord], window: usize, min_samples: usize) -> Vec<Option<f64>> {
    let bids: Vec<Option<f64>> = records.iter().map(|r| r.max_bid).collect();
    let filled: Vec<Option<f64>> = bids
        .iter()
        .zip(centered_rolling_mean(&bids, window, min_samples))
        .map(|(bid, neighbor)| bid.or(neighbor))
        .collect();

    let known: Vec<f64> = filled.iter().flatten().copied().collect();
    let mean = (!known.is_empty()).then(|| known.iter().sum::<f64>() / known.len() as f64);

    filled.into_iter().map(|bid| bid.or(mean)).collect()
}

/// Builds the seven category curves over `records` in slot order.
pub fn bid_distributions(
    records: &[SlotRecord],
    variant: BidVariant,
    window: usize,
    min_samples: usize,
) -> BidDistributions {
    let bids: Vec<Option<f64>> = match variant {
        BidVariant::Raw => records.iter().map(|r| r.max_bid).collect(),
        BidVariant::Filled => fill_bids(records, window, min_samples),
    };

    let unplotted = records
        .iter()
        .zip(&bids)
        .filter(|(record, bid)| record.is_rocketpool && bid.is_none())
        .map(|(record, _)| UnplottedSlot {
            slot: record.slot,
            node_address: record.node_address.clone(),
            is_vanilla: record.is_vanilla(),
            correct_fee_recipient: record.correct_fee_recipient,
        })
        .collect();

    let curves = BidCategory::ALL
        .iter()
        .map(|category| {
            let sample: Vec<f64> = records
                .iter()
                .zip(&bids)
                .filter(|(record, _)| category.contains(record))
                .filter_map(|(_, bid)| *bid)
                .collect();
            let (x, y) = survival_function(&sample);
            SurvivalCurve {
                category: *category,
                samples: sample.len(),
                x,
                y,
            }
        })
        .collect();

    BidDistributions {
        variant,
        curves,
        unplotted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pool_slot, with_bid};

    #[test]
    fn survival_of_three_values() {
        let (x, y) = survival_function(&[3.0, 1.0, 2.0]);
        assert_eq!(x, vec![0.0, 1.0, 2.0, 3.0]);
        let expected = [1.0, 2.0 / 3.0, 1.0 / 3.0, 0.0];
        for (got, want) in y.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_sample_is_a_single_point() {
        assert_eq!(survival_function(&[]), (vec![0.0], vec![1.0]));
    }

    fn dataset() -> Vec<SlotRecord> {
        vec![
            with_bid(1, Some(1.0), Some(0.9)),
            SlotRecord {
                correct_fee_recipient: Some(false),
                ..with_bid(2, Some(2.0), Some(1.8))
            },
            pool_slot(3),
            SlotRecord {
                is_rocketpool: false,
                correct_fee_recipient: None,
                ..with_bid(4, Some(4.0), None)
            },
        ]
    }

    fn samples(dist: &BidDistributions, category: BidCategory) -> usize {
        dist.curves
            .iter()
            .find(|c| c.category == category)
            .map_or(0, |c| c.samples)
    }

    #[test]
    fn raw_curves_skip_missing_bids() {
        let dist = bid_distributions(&dataset(), BidVariant::Raw, 7, 1);
        assert_eq!(dist.curves.len(), 7);
        assert_eq!(samples(&dist, BidCategory::All), 3);
        assert_eq!(samples(&dist, BidCategory::Pool), 2);
        assert_eq!(samples(&dist, BidCategory::PoolMevGoodRecipient), 1);
        assert_eq!(samples(&dist, BidCategory::PoolMevBadRecipient), 1);
        assert_eq!(samples(&dist, BidCategory::PoolVanillaGoodRecipient), 0);
        assert_eq!(samples(&dist, BidCategory::NonPoolVanilla), 1);

        assert_eq!(dist.unplotted.len(), 1);
        assert_eq!(dist.unplotted[0].slot, 3);
        assert!(dist.unplotted[0].is_vanilla);
    }

    #[test]
    fn filled_curves_use_neighbor_bids() {
        let dist = bid_distributions(&dataset(), BidVariant::Filled, 7, 1);
        assert!(dist.unplotted.is_empty());
        assert_eq!(samples(&dist, BidCategory::PoolVanillaGoodRecipient), 1);

        let filled = fill_bids(&dataset(), 7, 1);
        assert_eq!(filled[2], Some(7.0 / 3.0));
    }

    #[test]
    fn isolated_gap_takes_mean_of_neighbor_filled_bids() {
        let records: Vec<SlotRecord> = (0..13)
            .map(|slot| match slot {
                1 => with_bid(slot, Some(1.0), None),
                12 => with_bid(slot, Some(4.0), None),
                _ => pool_slot(slot),
            })
            .collect();

        let filled = fill_bids(&records, 7, 1);
        // slots 0..=4 pick up 1.0, slots 9..=12 pick up 4.0
        assert_eq!(filled[4], Some(1.0));
        assert_eq!(filled[9], Some(4.0));
        let expected = (5.0 * 1.0 + 4.0 * 4.0) / 9.0;
        assert!(filled[6].is_some_and(|bid| (bid - expected).abs() < 1e-12));
    }

    #[test]
    fn filled_without_any_bid_stays_unplotted() {
        let dist = bid_distributions(&[pool_slot(1), pool_slot(2)], BidVariant::Filled, 7, 1);
        assert_eq!(dist.unplotted.len(), 2);
        assert!(dist.curves.iter().all(|c| c.samples == 0));
    }
}
