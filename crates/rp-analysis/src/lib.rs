//! rp-analysis crate
//!
//! Reward-loss attribution for staking-pool blocks: record normalization,
//! bid imputation, the relay-compliance filter, fee recipient checks, per-slot
//! loss estimates, yield impact and bid distributions.

pub mod bid_ratio;
pub mod config;
pub mod distribution;
pub mod impute;
pub mod losses;
pub mod normalize;
pub mod pipeline;
pub mod recipient;
pub mod relay_filter;
pub mod yield_impact;

#[cfg(test)]
mod test_support;
