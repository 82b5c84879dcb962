//! Pickup-Method Reconciler
//!
//! An order collects produce from every storage unit its lines draw on, and the buyer picks
//! one method per unit. Records are created on demand and pruned once a unit is no longer
//! referenced.

use rustc_hash::FxHashSet;
use slotmap::new_key_type;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    errors::{EngineError, ValidationError},
    orders::{OrderKey, OrderStatus, require_status},
    storage_units::StorageUnitKey,
    store::{Store, Transaction},
};

new_key_type! {
    /// Pickup Key
    pub struct PickupKey;
}

/// How the buyer collects produce from a storage unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PickupMethod {
    /// The buyer collects at the storage unit.
    #[default]
    SelfPickup,

    /// The operator delivers to the buyer.
    Delivery,
}

/// Pickup method chosen for one (order, storage unit) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickupRecord {
    /// Order
    pub order: OrderKey,

    /// Storage unit produce is collected from
    pub storage_unit: StorageUnitKey,

    /// Chosen method
    pub method: PickupMethod,
}

/// Distinct storage units referenced by an order's line items.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if a line's listing or crate is missing.
pub fn order_storage_units(
    store: &Store,
    order: OrderKey,
) -> Result<FxHashSet<StorageUnitKey>, EngineError> {
    let mut units = FxHashSet::default();

    for (_, item) in store.line_items_for_order(order) {
        let listing = store.listing(item.listing)?;

        units.insert(store.krate(listing.krate)?.storage_unit);
    }

    Ok(units)
}

/// Delete pickup records for storage units the order no longer references.
///
/// Returns how many records were removed.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if a line's listing or crate is missing.
pub fn reconcile_pickups(tx: &mut Transaction<'_>, order: OrderKey) -> Result<usize, EngineError> {
    let referenced = order_storage_units(tx.store(), order)?;

    let stale: SmallVec<[PickupKey; 4]> = tx
        .store()
        .pickups_for_order(order)
        .filter(|(_, pickup)| !referenced.contains(&pickup.storage_unit))
        .map(|(key, _)| key)
        .collect();

    for key in &stale {
        tx.store_mut().remove_pickup(*key);
    }

    if !stale.is_empty() {
        debug!(order_key = ?order, removed = stale.len(), "pruned pickup records");
    }

    Ok(stale.len())
}

/// Make sure the (order, storage unit) pair has a record, creating one with the default
/// method.
pub(crate) fn ensure_pickup(
    tx: &mut Transaction<'_>,
    order: OrderKey,
    storage_unit: StorageUnitKey,
) -> PickupKey {
    if let Some(key) = tx.store().pickup_for(order, storage_unit) {
        return key;
    }

    tx.store_mut().insert_pickup(PickupRecord {
        order,
        storage_unit,
        method: PickupMethod::default(),
    })
}

/// Choose the pickup method for one storage unit of a cart.
///
/// Records are never edited: the pair's existing record is replaced by a new one.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless the order is a cart, or [`ValidationError::UnreferencedStorageUnit`] if none of its
/// lines draw on the unit.
pub fn set_pickup_method(
    tx: &mut Transaction<'_>,
    order: OrderKey,
    storage_unit: StorageUnitKey,
    method: PickupMethod,
) -> Result<PickupKey, EngineError> {
    require_status(tx.store().order(order)?, OrderStatus::Cart)?;

    if !order_storage_units(tx.store(), order)?.contains(&storage_unit) {
        return Err(ValidationError::UnreferencedStorageUnit.into());
    }

    if let Some(previous) = tx.store().pickup_for(order, storage_unit) {
        tx.store_mut().remove_pickup(previous);
    }

    let key = tx.store_mut().insert_pickup(PickupRecord {
        order,
        storage_unit,
        method,
    });

    debug!(order_key = ?order, storage_unit_key = ?storage_unit, ?method, "chose pickup method");

    Ok(key)
}
