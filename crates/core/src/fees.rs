//! Cooling fees
//!
//! Fee accounting is a read-only query over a crate and its movement history. The engine
//! consumes it through [`FeeLedger`]; [`PolicyFeeLedger`] prices crates from the per-crop
//! policy captured at check-in.

use jiff::Timestamp;
use rust_decimal::Decimal;
use smallvec::SmallVec;

use crate::{
    crates::{Crate, CrateKey},
    errors::EngineError,
    movements::{Movement, MovementKind},
    store::Store,
};

const SECONDS_PER_DAY: i64 = 86_400;

/// Per-crop cooling-fee policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoolingFeePolicy {
    /// A one-off fee per kg checked in, regardless of storage time.
    Fixed {
        /// Fee per kg
        per_kg: Decimal,
    },

    /// A fee per kg for every (started) day in storage.
    Daily {
        /// Fee per kg per day
        per_kg_per_day: Decimal,
    },
}

/// Everything a fee ledger may read about one crate.
#[derive(Debug)]
pub struct FeeQuery<'a> {
    /// Crate being priced
    pub key: CrateKey,

    /// Crate record
    pub krate: &'a Crate,

    /// The crate's movement history, oldest first
    pub movements: SmallVec<[&'a Movement; 4]>,

    /// Point in time fees are computed for
    pub now: Timestamp,
}

impl<'a> FeeQuery<'a> {
    /// Gather the crate and its movements from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the crate is missing.
    pub fn collect(store: &'a Store, key: CrateKey, now: Timestamp) -> Result<Self, EngineError> {
        let krate = store.krate(key)?;

        let mut movements: SmallVec<[&'a Movement; 4]> = store.movements_for_crate(key).collect();
        movements.sort_by_key(|movement| movement.at);

        Ok(Self {
            key,
            krate,
            movements,
            now,
        })
    }

    /// Total fees paid by check-out movements.
    pub fn paid(&self) -> Decimal {
        self.movements
            .iter()
            .filter(|movement| movement.kind == MovementKind::CheckOut)
            .map(|movement| movement.fee_paid)
            .sum()
    }

    /// Started days in storage, at least one.
    pub fn days_in_storage(&self) -> i64 {
        let seconds = self
            .now
            .duration_since(self.krate.checked_in_at)
            .as_secs()
            .max(0);

        ((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY).max(1)
    }
}

/// Fee accounting consumed by the engine.
pub trait FeeLedger: Send + Sync {
    /// Fees accrued by the crate since check-in.
    fn total_accrued_fees(&self, query: &FeeQuery<'_>) -> Decimal;

    /// Fees already paid for the crate.
    fn total_paid_fees(&self, query: &FeeQuery<'_>) -> Decimal;

    /// Outstanding fee per kg still in the crate.
    fn due_fee_per_unit_mass(&self, query: &FeeQuery<'_>) -> Decimal {
        let due = (self.total_accrued_fees(query) - self.total_paid_fees(query)).max(Decimal::ZERO);

        if query.krate.weight <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        due.checked_div(query.krate.weight).unwrap_or(Decimal::ZERO)
    }
}

/// Fee ledger driven by each crate's [`CoolingFeePolicy`].
///
/// Check-outs pay the withdrawn share of the outstanding fee, so paid fees are the sum of the
/// crate's check-out movements.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFeeLedger;

impl FeeLedger for PolicyFeeLedger {
    fn total_accrued_fees(&self, query: &FeeQuery<'_>) -> Decimal {
        match query.krate.cooling_policy {
            CoolingFeePolicy::Fixed { per_kg } => per_kg * query.krate.initial_weight,
            CoolingFeePolicy::Daily { per_kg_per_day } => {
                let days = Decimal::from(query.days_in_storage());

                query.paid() + per_kg_per_day * days * query.krate.weight
            }
        }
    }

    fn total_paid_fees(&self, query: &FeeQuery<'_>) -> Decimal {
        query.paid()
    }
}
