//! rp-data crate
//!
//! Data model, input loaders, the relay metadata cache and explorer client,
//! and the SQLite results store.

pub mod beaconchain;
pub mod loader;
pub mod relay_cache;
pub mod store;
pub mod types;

pub use types::{
    ExchangeSnapshot, MevRecipientLoss, RawSlotRecord, RelayMetadata, RelayResolution,
    RemovedSlot, SlotRecord, UnplottedSlot, VanillaLossBranch, VanillaLossRecord,
};
