//! Storage-Unit Occupancy

use jiff::Timestamp;
use rust_decimal::Decimal;
use slotmap::new_key_type;
use tracing::trace;

use crate::{
    errors::EngineError,
    recompute::{Recompute, RecomputeOptions},
    store::Transaction,
};

new_key_type! {
    /// Storage Unit Key
    pub struct StorageUnitKey;
}

/// How a storage unit's capacity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityMetric {
    /// Capacity is a number of crates.
    #[default]
    Count,

    /// Capacity is a volume in cubic metres.
    Volume,
}

/// Outer dimensions of the standard crate a unit stores, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrateDimensions {
    /// Length (m)
    pub length: Decimal,

    /// Width (m)
    pub width: Decimal,

    /// Height (m)
    pub height: Decimal,
}

impl CrateDimensions {
    /// Volume of one crate in cubic metres.
    pub fn volume(&self) -> Decimal {
        self.length * self.width * self.height
    }
}

/// A physical cold-storage room or container.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUnit {
    /// Display name
    pub name: String,

    /// Unit the capacity is expressed in
    pub metric: CapacityMetric,

    /// Capacity in crates or cubic metres, depending on `metric`
    pub capacity: Decimal,

    /// Dimensions of the crates stored here
    pub crate_dimensions: CrateDimensions,

    /// Crates currently holding produce
    pub occupying_crates: usize,

    /// Fraction of capacity in use (`1` is full)
    pub occupancy: Decimal,

    /// When occupancy was last computed
    pub computed_at: Option<Timestamp>,
}

impl StorageUnit {
    /// A unit whose capacity is counted in crates.
    pub fn counted(name: impl Into<String>, capacity: u32) -> Self {
        Self::new(
            name,
            CapacityMetric::Count,
            Decimal::from(capacity),
            CrateDimensions::default(),
        )
    }

    /// A unit whose capacity is a volume in cubic metres.
    pub fn by_volume(
        name: impl Into<String>,
        capacity: Decimal,
        crate_dimensions: CrateDimensions,
    ) -> Self {
        Self::new(name, CapacityMetric::Volume, capacity, crate_dimensions)
    }

    fn new(
        name: impl Into<String>,
        metric: CapacityMetric,
        capacity: Decimal,
        crate_dimensions: CrateDimensions,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            capacity,
            crate_dimensions,
            occupying_crates: 0,
            occupancy: Decimal::ZERO,
            computed_at: None,
        }
    }

    /// Occupancy as a percentage rounded to two places.
    pub fn occupancy_percent(&self) -> Decimal {
        (self.occupancy * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

/// Occupancy ratio for `occupying` crates in `unit`.
///
/// Volume-measured units only count the usable share of their volume, `utilization`.
pub fn occupancy_ratio(unit: &StorageUnit, occupying: usize, utilization: Decimal) -> Decimal {
    let occupying = Decimal::from(occupying);

    let (used, available) = match unit.metric {
        CapacityMetric::Count => (occupying, unit.capacity),
        CapacityMetric::Volume => (
            occupying * unit.crate_dimensions.volume(),
            unit.capacity * utilization,
        ),
    };

    if available <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    used.checked_div(available).unwrap_or(Decimal::ZERO)
}

/// Recompute how full a storage unit is.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if the storage unit is missing.
pub fn recompute_storage_unit(
    tx: &mut Transaction<'_>,
    key: StorageUnitKey,
    options: RecomputeOptions,
) -> Result<StorageUnit, EngineError> {
    let mut unit = tx.store().storage_unit(key)?.clone();

    let occupying = tx
        .store()
        .crates_in_storage_unit(key)
        .filter(|(_, krate)| krate.is_occupying())
        .count();

    unit.occupying_crates = occupying;
    unit.occupancy = occupancy_ratio(&unit, occupying, tx.config().storage_utilization);
    unit.computed_at = Some(tx.now());

    trace!(storage_unit_key = ?key, occupying, occupancy = %unit.occupancy, "recomputed storage unit");

    if options.persist {
        *tx.store_mut().storage_unit_mut(key)? = unit.clone();
    }

    Ok(unit)
}

impl Recompute for StorageUnitKey {
    type Output = StorageUnit;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<StorageUnit, EngineError> {
        recompute_storage_unit(tx, self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utilization() -> Decimal {
        Decimal::new(68, 2)
    }

    #[test]
    fn counted_unit_divides_by_crate_capacity() {
        let unit = StorageUnit::counted("Room A", 40);

        assert_eq!(occupancy_ratio(&unit, 10, utilization()), Decimal::new(25, 2));
    }

    #[test]
    fn volume_unit_uses_usable_volume() {
        let dimensions = CrateDimensions {
            length: Decimal::new(5, 1),
            width: Decimal::new(4, 1),
            height: Decimal::new(3, 1),
        };
        let unit = StorageUnit::by_volume("Container", Decimal::new(10, 0), dimensions);

        // 17 crates * 0.06 m3 = 1.02 m3 of 6.8 usable m3
        assert_eq!(occupancy_ratio(&unit, 17, utilization()), Decimal::new(15, 2));
    }

    #[test]
    fn zero_capacity_reports_empty() {
        let unit = StorageUnit::counted("Broken", 0);

        assert_eq!(occupancy_ratio(&unit, 3, utilization()), Decimal::ZERO);
    }

    #[test]
    fn occupancy_percent_rounds() {
        let mut unit = StorageUnit::counted("Room A", 3);
        unit.occupancy = occupancy_ratio(&unit, 1, utilization());

        assert_eq!(unit.occupancy_percent(), Decimal::new(3_333, 2));
    }
}
