//! Coldroom
//!
//! Coldroom is the valuation core of a cold-storage produce marketplace. It keeps the derived
//! figures of stored crates, storage units, market listings and buyer orders consistent:
//! cooling-fee liabilities, occupancy, locked and available weight, and cart totals.
//!
//! Every mutation goes through [`engine::Engine`], which runs it as a single transaction over
//! an arena [`store::Store`] and recomputes affected aggregates leaf-to-root.

pub mod config;
pub mod coupons;
pub mod crates;
pub mod currency;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fees;
pub mod listings;
pub mod movements;
pub mod orders;
pub mod payments;
pub mod pickups;
pub mod prelude;
pub mod produce;
pub mod recompute;
pub mod storage_units;
pub mod store;
pub mod uuids;
