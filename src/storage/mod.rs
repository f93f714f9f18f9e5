//! Hourly unit storage.
//!
//! - **Codec** (`types`): live [`Unit`] accumulator, persisted [`UnitRecord`], top-K helpers
//! - **Store** (`unit_store`): SQLite-backed transactional store, one record per unit
//!
//! Records are written once when their hour is retired and afterwards only
//! replaced or deleted.

pub mod types;
pub mod unit_store;

pub use types::{
    merge_all, merge_top_k, top_k, CountPair, Unit, UnitRecord, MAX_CLIENTS, MAX_DOMAINS,
};
pub use unit_store::{unit_id_from_key, unit_key, StoreError, StoreTxn, UnitStore};
