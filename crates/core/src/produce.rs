//! Produce Rollup

use jiff::Timestamp;
use slotmap::new_key_type;
use tracing::trace;

use crate::{
    errors::EngineError,
    recompute::{Recompute, RecomputeOptions},
    storage_units::StorageUnitKey,
    store::Transaction,
    uuids::UserUuid,
};

new_key_type! {
    /// Produce Key
    pub struct ProduceKey;
}

/// One intake event's batch of crates.
#[derive(Debug, Clone, PartialEq)]
pub struct Produce {
    /// Crop name
    pub crop: String,

    /// Farmer or trader who checked the produce in
    pub owner: UserUuid,

    /// Storage unit the batch was checked into
    pub storage_unit: StorageUnitKey,

    /// Set once every crate in the batch is empty
    pub checkout_completed: bool,

    /// When the batch was checked in
    pub checked_in_at: Timestamp,

    /// When the rollup was last computed
    pub computed_at: Option<Timestamp>,
}

/// Recompute whether every crate of the batch has been checked out.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if the produce record is missing.
pub fn recompute_produce(
    tx: &mut Transaction<'_>,
    key: ProduceKey,
    options: RecomputeOptions,
) -> Result<Produce, EngineError> {
    let mut produce = tx.store().produce(key)?.clone();

    let occupying = tx
        .store()
        .crates_in_produce(key)
        .filter(|(_, krate)| krate.is_occupying())
        .count();

    produce.checkout_completed = occupying == 0;
    produce.computed_at = Some(tx.now());

    trace!(produce_key = ?key, occupying, "recomputed produce");

    if options.persist {
        *tx.store_mut().produce_mut(key)? = produce.clone();
    }

    Ok(produce)
}

impl Recompute for ProduceKey {
    type Output = Produce;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<Produce, EngineError> {
        recompute_produce(tx, self, options)
    }
}
