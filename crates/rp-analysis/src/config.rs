//! Run parameters for the loss analysis.

use std::time::Duration;

/// Slot at which the grace period for default fee recipients ended
/// (2022-11-24).
pub const PENALTY_START_SLOT: u64 = 5_203_679;

/// Fee recipient for nodes enrolled in the smoothing pool.
pub const SMOOTHING_POOL_ADDRESS: &str = "0xd4E96eF8eee8678dBFf4d535E033Ed1a4F7605b7";

/// Beacon chain genesis, unix seconds.
pub const GENESIS_TIMESTAMP: u64 = 1_606_824_023;

pub const SECONDS_PER_SLOT: u64 = 12;

pub const SECONDS_PER_WEEK: f64 = 60.0 * 60.0 * 24.0 * 7.0;

pub const SECONDS_PER_YEAR: f64 = 60.0 * 60.0 * 24.0 * 365.25;

/// Relays known to drop the winning bid from their bid archive.
pub const GAP_PRONE_RELAYS: [&str; 3] = [
    "bloXroute Max Profit",
    "bloXroute Regulated",
    "bloXroute Max Profit;bloXroute Regulated",
];

/// Pacing and retry budget for explorer lookups.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayFilterConfig {
    /// Pause after every resolved slot.
    pub request_interval: Duration,
    /// Pause before retrying a failed lookup.
    pub failure_backoff: Duration,
    /// Consecutive failures tolerated before the run aborts.
    pub max_consecutive_failures: u32,
    /// Show a progress bar while resolving.
    pub show_progress: bool,
}

impl Default for RelayFilterConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_secs(11),
            failure_backoff: Duration::from_secs(30),
            max_consecutive_failures: 10,
            show_progress: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisConfig {
    pub penalty_start_slot: u64,
    pub smoothing_pool_address: String,
    /// Records above this commission are reported but kept.
    pub max_expected_fee: f64,
    /// Records below this commission are excluded from the pool.
    pub min_expected_fee: f64,
    /// Centered window, in records, for neighbor bid estimates.
    pub neighbor_window: usize,
    pub neighbor_min_samples: usize,
    pub gap_prone_relays: Vec<String>,
    pub relay_filter: RelayFilterConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            penalty_start_slot: PENALTY_START_SLOT,
            smoothing_pool_address: SMOOTHING_POOL_ADDRESS.to_string(),
            max_expected_fee: 0.2,
            min_expected_fee: 0.05,
            neighbor_window: 7,
            neighbor_min_samples: 1,
            gap_prone_relays: GAP_PRONE_RELAYS.iter().map(|s| s.to_string()).collect(),
            relay_filter: RelayFilterConfig::default(),
        }
    }
}

/// Wall-clock time of a slot's start.
pub fn slot_to_timestamp(slot: u64) -> u64 {
    GENESIS_TIMESTAMP + SECONDS_PER_SLOT * slot
}

/// Weeks spanned by `slots` consecutive slots.
pub fn slots_to_weeks(slots: u64) -> f64 {
    (slots * SECONDS_PER_SLOT) as f64 / SECONDS_PER_WEEK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_timestamps_follow_genesis() {
        assert_eq!(slot_to_timestamp(0), GENESIS_TIMESTAMP);
        assert_eq!(slot_to_timestamp(PENALTY_START_SLOT), 1_669_268_171);
    }

    #[test]
    fn one_week_of_slots() {
        assert!((slots_to_weeks(50_400) - 1.0).abs() < 1e-12);
    }
}
