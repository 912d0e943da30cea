//! Readers for the on-disk inputs of an analysis run.
//!
//! - Slot snapshot CSVs named `<prefix>_slot-<start>-to-<end>.csv`, whose
//!   economic columns are wei-denominated decimal integers.
//! - The exchange-rate ledger, one JSON array per line with hex quantities.
//! - The node-to-distributor mapping, a flat JSON object.

use eyre::{eyre, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{ExchangeSnapshot, RawSlotRecord};

const WEI_PER_ETH: f64 = 1e18;

/// Slot records gathered from every snapshot file of a data directory.
#[derive(Clone, Debug, Default)]
pub struct SnapshotSet {
    pub records: Vec<RawSlotRecord>,
    /// First slot named by the first file.
    pub start_slot: u64,
    /// Last slot named by the last file.
    pub end_slot: u64,
    pub files: Vec<PathBuf>,
}

/// Converts a decimal wei string to ETH; anything unparsable is `None`.
pub fn wei_to_eth(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u128>().ok().map(|wei| wei as f64 / WEI_PER_ETH)
}

fn parse_hex_u128(value: &str) -> Result<u128> {
    let stripped = value.trim().trim_start_matches("0x");
    if stripped.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(stripped, 16).wrap_err_with(|| format!("invalid hex quantity {value:?}"))
}

/// Extracts `(start, end)` from a file name like `rockettheft_slot-100-to-200.csv`.
pub fn slot_range_from_name(path: &Path) -> Result<(u64, u64)> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| eyre!("non UTF-8 snapshot file name: {}", path.display()))?;

    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 4 || parts[2] != "to" {
        return Err(eyre!("snapshot file name has no slot range: {name}"));
    }

    let start = parts[1]
        .parse::<u64>()
        .wrap_err_with(|| format!("bad start slot in {name}"))?;
    let end = parts[3]
        .parse::<u64>()
        .wrap_err_with(|| format!("bad end slot in {name}"))?;
    Ok((start, end))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn column<'a>(columns: &HashMap<&str, usize>, parts: &[&'a str], name: &str) -> &'a str {
    columns
        .get(name)
        .and_then(|idx| parts.get(*idx))
        .copied()
        .unwrap_or("")
}

/// Parses one snapshot CSV body. The first line must be the header.
pub fn parse_snapshot_csv(content: &str) -> Result<Vec<RawSlotRecord>> {
    let mut lines = content.lines();
    let header = lines.next().ok_or_else(|| eyre!("snapshot file is empty"))?;
    let columns: HashMap<&str, usize> = header
        .split(',')
        .enumerate()
        .map(|(idx, name)| (name.trim(), idx))
        .collect();

    let slot_idx = *columns
        .get("slot")
        .ok_or_else(|| eyre!("snapshot header is missing the slot column"))?;

    let mut records = Vec::new();
    for (line_number, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        let field = |name: &str| column(&columns, &parts, name);

        let slot = match parts.get(slot_idx).and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(slot) => slot,
            None => {
                debug!(line_number, "skipping snapshot row without a slot");
                continue;
            }
        };

        records.push(RawSlotRecord {
            slot,
            node_address: field("node_address").trim().to_string(),
            proposer_index: field("proposer_index").trim().parse::<f64>().ok().map(|v| v as u64),
            is_rocketpool: parse_bool(field("is_rocketpool")),
            in_smoothing_pool: parse_bool(field("in_smoothing_pool")),
            avg_fee: wei_to_eth(field("avg_fee")),
            eth_collat_ratio: wei_to_eth(field("eth_collat_ratio")),
            max_bid: wei_to_eth(field("max_bid")),
            mev_reward: wei_to_eth(field("mev_reward")),
            mev_reward_relay: non_empty(field("mev_reward_relay")),
            priority_fees: wei_to_eth(field("priority_fees")),
            fee_recipient: non_empty(field("fee_recipient")),
        });
    }

    Ok(records)
}

/// Loads every `*.csv` snapshot in `data_dir`, in file-name order.
///
/// # Errors
/// Returns error if the directory holds no snapshots or a file cannot be read.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display()))]
pub fn load_snapshots(data_dir: &Path) -> Result<SnapshotSet> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .wrap_err_with(|| format!("failed to list {}", data_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();

    let (first, last) = match (files.first(), files.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(eyre!("no snapshot CSVs found in {}", data_dir.display())),
    };
    let (start_slot, _) = slot_range_from_name(first)?;
    let (_, end_slot) = slot_range_from_name(last)?;

    let mut records = Vec::new();
    for path in &files {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let rows = parse_snapshot_csv(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        debug!(file = %path.display(), rows = rows.len(), "loaded snapshot");
        records.extend(rows);
    }

    info!(
        files = files.len(),
        records = records.len(),
        start_slot,
        end_slot,
        "snapshots loaded"
    );

    Ok(SnapshotSet {
        records,
        start_slot,
        end_slot,
        files,
    })
}

fn json_u64(value: &serde_json::Value) -> Result<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| eyre!("expected unsigned integer, got {n}")),
        serde_json::Value::String(s) if s.starts_with("0x") => Ok(parse_hex_u128(s)? as u64),
        serde_json::Value::String(s) => s.parse::<u64>().wrap_err("invalid integer string"),
        other => Err(eyre!("expected integer, got {other}")),
    }
}

fn json_hex_eth(value: &serde_json::Value) -> Result<f64> {
    let text = value
        .as_str()
        .ok_or_else(|| eyre!("expected hex string, got {value}"))?;
    Ok(parse_hex_u128(text)? as f64 / WEI_PER_ETH)
}

/// Parses the exchange-rate ledger body (JSON lines).
pub fn parse_ledger(content: &str) -> Result<Vec<ExchangeSnapshot>> {
    let mut snapshots = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Vec<serde_json::Value> = serde_json::from_str(line)
            .wrap_err_with(|| format!("ledger line {} is not a JSON array", line_number + 1))?;
        if row.len() < 5 {
            return Err(eyre!(
                "ledger line {} has {} fields, expected 5",
                line_number + 1,
                row.len()
            ));
        }

        snapshots.push(ExchangeSnapshot {
            block: json_u64(&row[0])?,
            total_eth: json_hex_eth(&row[1])?,
            staking_eth: json_hex_eth(&row[2])?,
            reth_supply: json_hex_eth(&row[3])?,
            timestamp: json_u64(&row[4])?,
        });
    }
    Ok(snapshots)
}

/// Loads the exchange-rate ledger from a JSON-lines file.
///
/// # Errors
/// Returns error if the file cannot be read or a line is malformed.
pub fn load_ledger(path: &Path) -> Result<Vec<ExchangeSnapshot>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read ledger {}", path.display()))?;
    parse_ledger(&content).wrap_err_with(|| format!("failed to parse ledger {}", path.display()))
}

/// Loads the node-to-distributor mapping.
///
/// # Errors
/// Returns error if the file cannot be read or is not a JSON string map.
pub fn load_distributor_map(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read distributor map {}", path.display()))?;
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("failed to parse distributor map {}", path.display()))
}
