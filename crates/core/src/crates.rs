//! Crate Ledger
//!
//! A crate is the atomic physical unit: a quantity of produce sitting in one storage unit.
//! It owns the raw weight and the cooling-fee accrual state every other aggregate builds on.

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use slotmap::new_key_type;
use tracing::trace;

use crate::{
    currency::{floor_zero, round_amount},
    errors::{EngineError, ValidationError},
    fees::{CoolingFeePolicy, FeeQuery},
    produce::{ProduceKey, recompute_produce},
    recompute::{Recompute, RecomputeOptions},
    storage_units::StorageUnitKey,
    store::Transaction,
};

new_key_type! {
    /// Crate Key
    pub struct CrateKey;
}

/// A discrete, weighable quantity of stored produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Crate {
    /// Intake batch the crate was created from
    pub produce: ProduceKey,

    /// Storage unit the crate sits in
    pub storage_unit: StorageUnitKey,

    /// Currency fees are accounted in
    pub currency: &'static Currency,

    /// Cooling-fee policy captured at check-in
    pub cooling_policy: CoolingFeePolicy,

    /// Weight at check-in (kg)
    pub initial_weight: Decimal,

    /// Current weight (kg)
    pub weight: Decimal,

    /// Displayed price, equal to the accrued cooling-fee liability
    pub price: Decimal,

    /// Cooling fees accrued so far
    pub accrued_fees: Decimal,

    /// Cooling fees paid at check-out
    pub paid_fees: Decimal,

    /// Cooling fees still owed
    pub due_fees: Decimal,

    /// Set once the crate has been emptied
    pub fully_checked_out: bool,

    /// When the crate entered storage
    pub checked_in_at: Timestamp,

    /// When the aggregates were last computed
    pub computed_at: Option<Timestamp>,
}

impl Crate {
    /// Create a freshly checked-in crate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidWeight`] if `weight` is negative.
    pub fn checked_in(
        produce: ProduceKey,
        storage_unit: StorageUnitKey,
        currency: &'static Currency,
        cooling_policy: CoolingFeePolicy,
        weight: Decimal,
        checked_in_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        if weight.is_sign_negative() {
            return Err(ValidationError::InvalidWeight(weight));
        }

        Ok(Self {
            produce,
            storage_unit,
            currency,
            cooling_policy,
            initial_weight: weight,
            weight,
            price: Decimal::ZERO,
            accrued_fees: Decimal::ZERO,
            paid_fees: Decimal::ZERO,
            due_fees: Decimal::ZERO,
            fully_checked_out: weight <= Decimal::ZERO,
            checked_in_at,
            computed_at: None,
        })
    }

    /// Whether the crate still holds produce.
    pub fn is_occupying(&self) -> bool {
        self.weight > Decimal::ZERO
    }

    /// Remove `weight` kg from the crate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidWeight`] unless `0 < weight <= self.weight`.
    pub fn withdraw(&mut self, weight: Decimal) -> Result<(), ValidationError> {
        if weight <= Decimal::ZERO || weight > self.weight {
            return Err(ValidationError::InvalidWeight(weight));
        }

        self.weight -= weight;

        Ok(())
    }
}

/// Recompute a crate's exhaustion flag, fee totals and price.
///
/// With `cascade`, the owning produce is recomputed afterwards.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if the crate (or, when cascading, its produce) is missing.
pub fn recompute_crate(
    tx: &mut Transaction<'_>,
    key: CrateKey,
    options: RecomputeOptions,
) -> Result<Crate, EngineError> {
    let now = tx.now();

    let (accrued, paid) = {
        let query = FeeQuery::collect(tx.store(), key, now)?;
        let fees = tx.fees();

        (
            fees.total_accrued_fees(&query),
            fees.total_paid_fees(&query),
        )
    };

    let mut krate = tx.store().krate(key)?.clone();

    krate.fully_checked_out = krate.weight <= Decimal::ZERO;
    krate.accrued_fees = round_amount(accrued, krate.currency);
    krate.paid_fees = round_amount(paid, krate.currency);
    krate.due_fees = floor_zero(krate.accrued_fees - krate.paid_fees);
    krate.price = krate.accrued_fees;
    krate.computed_at = Some(now);

    trace!(crate_key = ?key, weight = %krate.weight, due = %krate.due_fees, "recomputed crate");

    if options.persist {
        *tx.store_mut().krate_mut(key)? = krate.clone();
    }

    if options.cascade {
        recompute_produce(tx, krate.produce, options)?;
    }

    Ok(krate)
}

impl Recompute for CrateKey {
    type Output = Crate;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<Crate, EngineError> {
        recompute_crate(tx, self, options)
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::KES;

    use super::*;

    fn test_crate(weight: Decimal) -> Result<Crate, ValidationError> {
        Crate::checked_in(
            ProduceKey::default(),
            StorageUnitKey::default(),
            KES,
            CoolingFeePolicy::Fixed {
                per_kg: Decimal::ONE,
            },
            weight,
            Timestamp::UNIX_EPOCH,
        )
    }

    #[test]
    fn checked_in_rejects_negative_weight() {
        let result = test_crate(Decimal::NEGATIVE_ONE);

        assert_eq!(result, Err(ValidationError::InvalidWeight(Decimal::NEGATIVE_ONE)));
    }

    #[test]
    fn withdraw_keeps_weight_within_bounds() -> Result<(), ValidationError> {
        let mut krate = test_crate(Decimal::TEN)?;

        krate.withdraw(Decimal::new(4, 0))?;

        assert_eq!(krate.weight, Decimal::new(6, 0));
        assert_eq!(
            krate.withdraw(Decimal::new(7, 0)),
            Err(ValidationError::InvalidWeight(Decimal::new(7, 0)))
        );
        assert_eq!(
            krate.withdraw(Decimal::ZERO),
            Err(ValidationError::InvalidWeight(Decimal::ZERO))
        );
        assert_eq!(krate.weight, Decimal::new(6, 0), "failed withdrawals must not mutate");
        assert!(krate.weight <= krate.initial_weight);

        Ok(())
    }

    #[test]
    fn empty_crate_does_not_occupy() -> Result<(), ValidationError> {
        let krate = test_crate(Decimal::ZERO)?;

        assert!(!krate.is_occupying());
        assert!(krate.fully_checked_out);

        Ok(())
    }
}
