//! Fee recipient correctness.
//!
//! Smoothing-pool members must pay the smoothing pool; everyone else must pay
//! their node's fee distributor. Addresses compare case-insensitively since
//! sources mix checksummed and lowercase hex.

use eyre::{eyre, Result};
use rp_data::types::SlotRecord;
use std::collections::HashMap;
use tracing::info;

/// Expected fee recipients for every node.
#[derive(Clone, Debug)]
pub struct RecipientBook {
    smoothing_pool: String,
    /// Keyed by lowercase node address.
    distributors: HashMap<String, String>,
}

/// Case-insensitive address comparison.
pub fn recipients_match(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

impl RecipientBook {
    pub fn new(smoothing_pool: &str, distributors: HashMap<String, String>) -> Self {
        let distributors = distributors
            .into_iter()
            .map(|(node, distributor)| (node.to_lowercase(), distributor))
            .collect();
        Self {
            smoothing_pool: smoothing_pool.to_string(),
            distributors,
        }
    }

    /// Address `node` should have used as fee recipient.
    ///
    /// # Errors
    /// Returns error if a non-member node has no distributor mapping.
    pub fn expected_recipient(&self, node_address: &str, in_smoothing_pool: bool) -> Result<&str> {
        if in_smoothing_pool {
            return Ok(&self.smoothing_pool);
        }
        self.distributors
            .get(&node_address.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| eyre!("node {node_address} has no fee distributor mapping"))
    }

    /// Whether `actual` is the right recipient for `node`.
    ///
    /// # Errors
    /// Returns error if the expected recipient cannot be determined.
    pub fn is_correct(&self, node_address: &str, in_smoothing_pool: bool, actual: &str) -> Result<bool> {
        let expected = self.expected_recipient(node_address, in_smoothing_pool)?;
        Ok(recipients_match(actual, expected))
    }
}

/// Sets `correct_fee_recipient` on every pool record that carries a fee recipient.
///
/// Non-pool records and records without a recipient stay unclassified.
///
/// # Errors
/// Returns error if a pool node is missing from the distributor mapping.
pub fn classify_recipients(records: Vec<SlotRecord>, book: &RecipientBook) -> Result<Vec<SlotRecord>> {
    let out = records
        .into_iter()
        .map(|record| -> Result<SlotRecord> {
            let correct = match (&record.fee_recipient, record.is_rocketpool) {
                (Some(actual), true) => Some(book.is_correct(
                    &record.node_address,
                    record.in_smoothing_pool,
                    actual,
                )?),
                _ => None,
            };
            Ok(SlotRecord {
                correct_fee_recipient: correct,
                ..record
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let wrong = out
        .iter()
        .filter(|r| r.correct_fee_recipient == Some(false))
        .count();
    info!(records = out.len(), wrong, "fee recipients classified");
    Ok(out)
}
