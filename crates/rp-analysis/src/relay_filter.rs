//! Relay-compliance filter for vanilla pool slots.
//!
//! Snapshot data tags only one relay per block, so a vanilla-looking pool slot
//! may still have gone through a relay. Each such slot is checked against the
//! block explorer; any slot the explorer associates with a relay is removed
//! from the dataset, since whether it was MEV-boost or vanilla is unknowable.
//! Wrong-recipient losses in removed slots are tallied separately before they
//! are dropped.
//!
//! Resolution is split from removal: [`resolve_relay_metadata`] performs the
//! paced explorer lookups and fills the [`RelayCache`], and
//! [`remove_relay_tagged`] is a pure pass over the records and the cache.

use eyre::{eyre, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rp_data::beaconchain::RelayLookup;
use rp_data::relay_cache::RelayCache;
use rp_data::types::{RelayResolution, RemovedSlot, SlotRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::config::RelayFilterConfig;
use crate::recipient::RecipientBook;

/// Result of removing relay-tagged slots.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RelayFilterOutcome {
    /// Records that stay in the dataset.
    #[serde(skip)]
    pub kept: Vec<SlotRecord>,
    pub removed: Vec<RemovedSlot>,
    /// Sum of `lost_eth` over removed slots with a wrong recipient. Not part of
    /// the headline totals.
    pub removed_wrong_recipient_eth: f64,
    /// Relay tags over every cached slot.
    pub relay_tag_counts: BTreeMap<String, usize>,
    /// Cached slots the explorer saw without a relay.
    pub no_relay_count: usize,
    /// Node addresses of removed slots with a wrong recipient.
    pub wrong_recipient_nodes: BTreeMap<String, usize>,
}

fn needs_check(record: &SlotRecord) -> bool {
    record.is_vanilla() && record.is_rocketpool
}

/// Slots that still need an explorer lookup.
pub fn unresolved_slots(records: &[SlotRecord], cache: &RelayCache) -> Vec<u64> {
    records
        .iter()
        .filter(|r| needs_check(r) && !cache.is_resolved(r.slot))
        .map(|r| r.slot)
        .collect()
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} slots ({eta})")
    {
        pb.set_style(style);
    }
    pb
}

/// Resolves every unchecked vanilla pool slot through `lookup`.
///
/// Lookups run one at a time with a fixed pause between them. A failed lookup
/// is retried after the backoff; more than `max_consecutive_failures` failures
/// in a row abort the run. The working cache file is rewritten after every
/// resolution and committed once the batch completes, so an aborted run loses
/// nothing already resolved.
///
/// Returns the number of slots resolved by this call.
///
/// # Errors
/// Returns error when the retry budget is exhausted or the cache cannot be written.
#[tracing::instrument(skip_all)]
pub async fn resolve_relay_metadata<L: RelayLookup>(
    records: &[SlotRecord],
    cache: &mut RelayCache,
    lookup: &L,
    config: &RelayFilterConfig,
) -> Result<usize> {
    let pending = unresolved_slots(records, cache);
    info!(
        pending = pending.len(),
        cached = cache.len(),
        "resolving relay metadata for vanilla pool slots"
    );

    let pb = progress_bar(pending.len(), config.show_progress);
    let mut consecutive_failures = 0u32;

    for &slot in &pending {
        let resolution = loop {
            match lookup.lookup_slot(slot).await {
                Ok(resolution) => {
                    consecutive_failures = 0;
                    break resolution;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures > config.max_consecutive_failures {
                        pb.abandon();
                        return Err(e.wrap_err(format!(
                            "relay lookup for slot {slot} failed {consecutive_failures} times in a row; \
                             resolved slots are kept in {}",
                            cache.working_path().display()
                        )));
                    }
                    warn!(
                        slot,
                        attempt = consecutive_failures,
                        backoff_s = config.failure_backoff.as_secs(),
                        error = %e,
                        "relay lookup failed, backing off"
                    );
                    tokio::time::sleep(config.failure_backoff).await;
                }
            }
        };

        cache.insert(slot, resolution);
        cache.persist_working()?;
        pb.inc(1);
        tokio::time::sleep(config.request_interval).await;
    }

    pb.finish_and_clear();
    cache.commit()?;
    Ok(pending.len())
}

/// Removes every record the cache associates with a relay.
///
/// Only vanilla pool slots are ever looked up, so only they can be removed.
///
/// # Errors
/// Returns error if a removed slot's node has no expected recipient.
pub fn remove_relay_tagged(
    records: Vec<SlotRecord>,
    cache: &RelayCache,
    book: &RecipientBook,
) -> Result<RelayFilterOutcome> {
    let mut outcome = RelayFilterOutcome::default();

    for (_, resolution) in cache.iter() {
        match resolution.relay_tag() {
            Some(tag) => *outcome.relay_tag_counts.entry(tag.to_string()).or_default() += 1,
            None => outcome.no_relay_count += 1,
        }
    }

    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.slot) {
            return Err(eyre!("slot {} appears more than once", record.slot));
        }

        let meta = match (needs_check(&record), cache.get(record.slot)) {
            (true, Some(RelayResolution::Relayed(meta))) => meta,
            _ => {
                outcome.kept.push(record);
                continue;
            }
        };

        let expected = book.expected_recipient(&record.node_address, record.in_smoothing_pool)?;
        let correct = crate::recipient::recipients_match(&meta.producer_fee_recipient, expected);
        let lost_eth = if correct {
            0.0
        } else {
            record.reth_portion * meta.block_mev_reward
        };

        if !correct {
            outcome.removed_wrong_recipient_eth += lost_eth;
            *outcome
                .wrong_recipient_nodes
                .entry(record.node_address.clone())
                .or_default() += 1;
        }

        outcome.removed.push(RemovedSlot {
            slot: record.slot,
            node_address: record.node_address,
            relay_tag: meta.relay_tag.clone(),
            producer_fee_recipient: meta.producer_fee_recipient.clone(),
            expected_fee_recipient: expected.to_string(),
            correct_fee_recipient: correct,
            lost_eth,
        });
    }

    info!(
        removed = outcome.removed.len(),
        kept = outcome.kept.len(),
        relay_tags = ?outcome.relay_tag_counts,
        no_relay = outcome.no_relay_count,
        "removed vanilla slots the explorer ties to a relay"
    );
    info!(
        lost_eth = outcome.removed_wrong_recipient_eth,
        "wrong fee recipient losses in removed slots"
    );

    Ok(outcome)
}

/// Resolves pending slots, then removes relay-tagged ones.
///
/// # Errors
/// Propagates lookup, cache and recipient errors.
pub async fn filter_relay_tagged<L: RelayLookup>(
    records: Vec<SlotRecord>,
    cache: &mut RelayCache,
    lookup: &L,
    book: &RecipientBook,
    config: &RelayFilterConfig,
) -> Result<RelayFilterOutcome> {
    resolve_relay_metadata(&records, cache, lookup, config).await?;
    remove_relay_tagged(records, cache, book)
}
