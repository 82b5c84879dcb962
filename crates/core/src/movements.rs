//! Movements
//!
//! Check-ins create crates; check-outs withdraw weight from them and settle the withdrawn
//! share of their cooling fees. The history is append-only and feeds fee accounting.

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use slotmap::new_key_type;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::{
    crates::{Crate, CrateKey, recompute_crate},
    currency::round_amount,
    errors::{EngineError, ValidationError},
    events::DomainEvent,
    fees::CoolingFeePolicy,
    listings::recompute_listing,
    produce::{Produce, ProduceKey, recompute_produce},
    recompute::RecomputeOptions,
    storage_units::{StorageUnitKey, recompute_storage_unit},
    store::Transaction,
    uuids::UserUuid,
};

new_key_type! {
    /// Movement Key
    pub struct MovementKey;
}

/// Direction of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    /// Produce entered storage.
    CheckIn,

    /// Produce left storage.
    CheckOut,
}

/// One check-in or check-out of a crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    /// Crate moved
    pub krate: CrateKey,

    /// Direction
    pub kind: MovementKind,

    /// Weight moved (kg)
    pub weight: Decimal,

    /// Cooling fee settled by this movement
    pub fee_paid: Decimal,

    /// When the movement happened
    pub at: Timestamp,
}

/// An intake event: produce checked into one storage unit as one or more crates.
#[derive(Debug, Clone)]
pub struct NewProduce {
    /// Crop name
    pub crop: String,

    /// Owner of the produce
    pub owner: UserUuid,

    /// Destination storage unit
    pub storage_unit: StorageUnitKey,

    /// Currency cooling fees are charged in
    pub currency: &'static Currency,

    /// Cooling-fee policy for the crop
    pub cooling_policy: CoolingFeePolicy,

    /// Weight of each crate (kg)
    pub crate_weights: SmallVec<[Decimal; 8]>,
}

/// Check produce in, creating its crates and recomputing the affected aggregates.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidWeight`] for a negative crate weight, or
/// [`EngineError::NotFound`] if the storage unit is missing.
pub fn check_in(
    tx: &mut Transaction<'_>,
    new: NewProduce,
) -> Result<(ProduceKey, SmallVec<[CrateKey; 8]>), EngineError> {
    let now = tx.now();

    tx.store().storage_unit(new.storage_unit)?;

    let produce = tx.store_mut().insert_produce(Produce {
        crop: new.crop,
        owner: new.owner,
        storage_unit: new.storage_unit,
        checkout_completed: false,
        checked_in_at: now,
        computed_at: None,
    });

    let mut crates = SmallVec::new();

    for weight in new.crate_weights {
        let krate = Crate::checked_in(
            produce,
            new.storage_unit,
            new.currency,
            new.cooling_policy,
            weight,
            now,
        )?;

        let key = tx.store_mut().insert_crate(krate);

        tx.store_mut().insert_movement(Movement {
            krate: key,
            kind: MovementKind::CheckIn,
            weight,
            fee_paid: Decimal::ZERO,
            at: now,
        });

        recompute_crate(tx, key, RecomputeOptions::PERSIST)?;
        crates.push(key);
    }

    recompute_produce(tx, produce, RecomputeOptions::PERSIST)?;
    recompute_storage_unit(tx, new.storage_unit, RecomputeOptions::PERSIST)?;

    tx.emit(DomainEvent::ProduceCheckedIn { produce });

    info!(produce_key = ?produce, crates = crates.len(), "checked in produce");

    Ok((produce, crates))
}

/// Withdraw `weight` kg from a crate, settling its share of the outstanding cooling fee.
///
/// Recomputes the crate (cascading into its produce), its storage unit and every active
/// listing of the crate.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidWeight`] unless `0 < weight <= crate.weight`.
pub fn check_out(
    tx: &mut Transaction<'_>,
    key: CrateKey,
    weight: Decimal,
) -> Result<Crate, EngineError> {
    let now = tx.now();

    // Settle against fees accrued up to now.
    let current = recompute_crate(tx, key, RecomputeOptions::PERSIST)?;

    if weight <= Decimal::ZERO || weight > current.weight {
        return Err(ValidationError::InvalidWeight(weight).into());
    }

    let fee_paid = current
        .due_fees
        .checked_mul(weight)
        .and_then(|share| share.checked_div(current.weight))
        .map_or(Decimal::ZERO, |share| round_amount(share, current.currency));

    tx.store_mut().krate_mut(key)?.withdraw(weight)?;

    tx.store_mut().insert_movement(Movement {
        krate: key,
        kind: MovementKind::CheckOut,
        weight,
        fee_paid,
        at: now,
    });

    let krate = recompute_crate(tx, key, RecomputeOptions::PERSIST_CASCADE)?;
    recompute_storage_unit(tx, krate.storage_unit, RecomputeOptions::PERSIST)?;

    let listings: SmallVec<[_; 2]> = tx
        .store()
        .listings_for_crate(key)
        .filter(|(_, listing)| listing.is_active())
        .map(|(listing_key, _)| listing_key)
        .collect();

    for listing in listings {
        recompute_listing(tx, listing, RecomputeOptions::PERSIST)?;
    }

    tx.emit(DomainEvent::CrateCheckedOut {
        krate: key,
        weight,
        fee_paid,
    });

    debug!(crate_key = ?key, %weight, %fee_paid, remaining = %krate.weight, "checked out crate");

    Ok(krate)
}
