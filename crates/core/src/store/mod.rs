//! Entity store
//!
//! Entities reference each other by key only; every read goes through the store. Writes are
//! crate-private and happen inside a [`Transaction`], which works on its own copy of the store.

use std::sync::Arc;

use slotmap::{Key, SlotMap};

use crate::{
    coupons::{Coupon, CouponKey},
    crates::{Crate, CrateKey},
    errors::{ConflictError, EngineError, EntityKind},
    listings::{ListingKey, ListingPrice, ListingPriceKey, MarketListing},
    movements::{Movement, MovementKey},
    orders::{LineItemKey, Order, OrderKey, OrderLineItem},
    pickups::{PickupKey, PickupRecord},
    produce::{Produce, ProduceKey},
    storage_units::{StorageUnit, StorageUnitKey},
};

mod transaction;

pub use transaction::Transaction;

/// Arena holding every entity the engine values.
///
/// Each arena sits behind an [`Arc`], so cloning the store for a transaction is cheap and an
/// arena is only copied once the transaction first writes to it.
#[derive(Debug, Clone, Default)]
pub struct Store {
    crates: Arc<SlotMap<CrateKey, Crate>>,
    produce: Arc<SlotMap<ProduceKey, Produce>>,
    storage_units: Arc<SlotMap<StorageUnitKey, StorageUnit>>,
    movements: Arc<SlotMap<MovementKey, Movement>>,
    listings: Arc<SlotMap<ListingKey, MarketListing>>,
    listing_prices: Arc<SlotMap<ListingPriceKey, ListingPrice>>,
    orders: Arc<SlotMap<OrderKey, Order>>,
    line_items: Arc<SlotMap<LineItemKey, OrderLineItem>>,
    coupons: Arc<SlotMap<CouponKey, Coupon>>,
    pickups: Arc<SlotMap<PickupKey, PickupRecord>>,
}

fn fetch<K: Key, V>(map: &Arc<SlotMap<K, V>>, key: K, kind: EntityKind) -> Result<&V, EngineError> {
    map.get(key).ok_or(EngineError::NotFound(kind))
}

fn fetch_mut<K: Key, V: Clone>(
    map: &mut Arc<SlotMap<K, V>>,
    key: K,
    kind: EntityKind,
) -> Result<&mut V, EngineError> {
    // Check first so a miss doesn't copy a shared arena.
    if !map.contains_key(key) {
        return Err(EngineError::NotFound(kind));
    }

    Arc::make_mut(map)
        .get_mut(key)
        .ok_or(EngineError::NotFound(kind))
}

impl Store {
    /// Get a crate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn krate(&self, key: CrateKey) -> Result<&Crate, EngineError> {
        fetch(&self.crates, key, EntityKind::Crate)
    }

    /// Get a produce record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn produce(&self, key: ProduceKey) -> Result<&Produce, EngineError> {
        fetch(&self.produce, key, EntityKind::Produce)
    }

    /// Get a storage unit.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn storage_unit(&self, key: StorageUnitKey) -> Result<&StorageUnit, EngineError> {
        fetch(&self.storage_units, key, EntityKind::StorageUnit)
    }

    /// Get a market listing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn listing(&self, key: ListingKey) -> Result<&MarketListing, EngineError> {
        fetch(&self.listings, key, EntityKind::Listing)
    }

    /// Get a listing price snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn listing_price(&self, key: ListingPriceKey) -> Result<&ListingPrice, EngineError> {
        fetch(&self.listing_prices, key, EntityKind::ListingPrice)
    }

    /// Get an order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn order(&self, key: OrderKey) -> Result<&Order, EngineError> {
        fetch(&self.orders, key, EntityKind::Order)
    }

    /// Get an order line item.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn line_item(&self, key: LineItemKey) -> Result<&OrderLineItem, EngineError> {
        fetch(&self.line_items, key, EntityKind::LineItem)
    }

    /// Get a coupon.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn coupon(&self, key: CouponKey) -> Result<&Coupon, EngineError> {
        fetch(&self.coupons, key, EntityKind::Coupon)
    }

    /// Get a pickup record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the key is unknown.
    pub fn pickup(&self, key: PickupKey) -> Result<&PickupRecord, EngineError> {
        fetch(&self.pickups, key, EntityKind::Pickup)
    }

    /// Iterate over every crate.
    pub fn crates(&self) -> impl Iterator<Item = (CrateKey, &Crate)> {
        self.crates.iter()
    }

    /// Iterate over every listing.
    pub fn listings(&self) -> impl Iterator<Item = (ListingKey, &MarketListing)> {
        self.listings.iter()
    }

    /// Crates created by one intake event.
    pub fn crates_in_produce(&self, produce: ProduceKey) -> impl Iterator<Item = (CrateKey, &Crate)> {
        self.crates
            .iter()
            .filter(move |(_, krate)| krate.produce == produce)
    }

    /// Crates stored in one storage unit.
    pub fn crates_in_storage_unit(
        &self,
        unit: StorageUnitKey,
    ) -> impl Iterator<Item = (CrateKey, &Crate)> {
        self.crates
            .iter()
            .filter(move |(_, krate)| krate.storage_unit == unit)
    }

    /// Movement history of a crate, in no particular order.
    pub fn movements_for_crate(&self, krate: CrateKey) -> impl Iterator<Item = &Movement> {
        self.movements
            .values()
            .filter(move |movement| movement.krate == krate)
    }

    /// Every listing (active or delisted) of a crate.
    pub fn listings_for_crate(
        &self,
        krate: CrateKey,
    ) -> impl Iterator<Item = (ListingKey, &MarketListing)> {
        self.listings
            .iter()
            .filter(move |(_, listing)| listing.krate == krate)
    }

    /// The crate's active listing, if any.
    pub fn active_listing_for_crate(&self, krate: CrateKey) -> Option<ListingKey> {
        self.listings_for_crate(krate)
            .find(|(_, listing)| listing.is_active())
            .map(|(key, _)| key)
    }

    /// The most recent price snapshot of a listing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the listing is unknown or has never been priced.
    pub fn current_price(&self, listing: ListingKey) -> Result<&ListingPrice, EngineError> {
        let key = self
            .listing(listing)?
            .prices
            .last()
            .copied()
            .ok_or(EngineError::NotFound(EntityKind::ListingPrice))?;

        self.listing_price(key)
    }

    /// Line items of an order.
    pub fn line_items_for_order(
        &self,
        order: OrderKey,
    ) -> impl Iterator<Item = (LineItemKey, &OrderLineItem)> {
        self.line_items
            .iter()
            .filter(move |(_, item)| item.order == order)
    }

    /// Line items, across all orders, that reserve weight from a listing.
    pub fn line_items_for_listing(
        &self,
        listing: ListingKey,
    ) -> impl Iterator<Item = (LineItemKey, &OrderLineItem)> {
        self.line_items
            .iter()
            .filter(move |(_, item)| item.listing == listing)
    }

    /// The order's line item for a listing, if there is one.
    pub fn line_item_for(&self, order: OrderKey, listing: ListingKey) -> Option<LineItemKey> {
        self.line_items_for_order(order)
            .find(|(_, item)| item.listing == listing)
            .map(|(key, _)| key)
    }

    /// Look a coupon up by code, preferring the active one over revoked ones.
    pub fn coupon_by_code(&self, code: &str) -> Option<(CouponKey, &Coupon)> {
        let mut latest: Option<(CouponKey, &Coupon)> = None;

        for (key, coupon) in self.coupons.iter().filter(|(_, coupon)| coupon.code == code) {
            if coupon.is_active() {
                return Some((key, coupon));
            }

            if latest.is_none_or(|(_, seen)| coupon.created_at > seen.created_at) {
                latest = Some((key, coupon));
            }
        }

        latest
    }

    /// Pickup records of an order.
    pub fn pickups_for_order(
        &self,
        order: OrderKey,
    ) -> impl Iterator<Item = (PickupKey, &PickupRecord)> {
        self.pickups
            .iter()
            .filter(move |(_, pickup)| pickup.order == order)
    }

    /// The pickup record for an (order, storage unit) pair.
    pub fn pickup_for(&self, order: OrderKey, unit: StorageUnitKey) -> Option<PickupKey> {
        self.pickups_for_order(order)
            .find(|(_, pickup)| pickup.storage_unit == unit)
            .map(|(key, _)| key)
    }

    pub(crate) fn krate_mut(&mut self, key: CrateKey) -> Result<&mut Crate, EngineError> {
        fetch_mut(&mut self.crates, key, EntityKind::Crate)
    }

    pub(crate) fn produce_mut(&mut self, key: ProduceKey) -> Result<&mut Produce, EngineError> {
        fetch_mut(&mut self.produce, key, EntityKind::Produce)
    }

    pub(crate) fn storage_unit_mut(
        &mut self,
        key: StorageUnitKey,
    ) -> Result<&mut StorageUnit, EngineError> {
        fetch_mut(&mut self.storage_units, key, EntityKind::StorageUnit)
    }

    pub(crate) fn listing_mut(
        &mut self,
        key: ListingKey,
    ) -> Result<&mut MarketListing, EngineError> {
        fetch_mut(&mut self.listings, key, EntityKind::Listing)
    }

    pub(crate) fn order_mut(&mut self, key: OrderKey) -> Result<&mut Order, EngineError> {
        fetch_mut(&mut self.orders, key, EntityKind::Order)
    }

    pub(crate) fn line_item_mut(
        &mut self,
        key: LineItemKey,
    ) -> Result<&mut OrderLineItem, EngineError> {
        fetch_mut(&mut self.line_items, key, EntityKind::LineItem)
    }

    pub(crate) fn coupon_mut(&mut self, key: CouponKey) -> Result<&mut Coupon, EngineError> {
        fetch_mut(&mut self.coupons, key, EntityKind::Coupon)
    }

    pub(crate) fn insert_crate(&mut self, krate: Crate) -> CrateKey {
        Arc::make_mut(&mut self.crates).insert(krate)
    }

    pub(crate) fn insert_produce(&mut self, produce: Produce) -> ProduceKey {
        Arc::make_mut(&mut self.produce).insert(produce)
    }

    pub(crate) fn insert_storage_unit(&mut self, unit: StorageUnit) -> StorageUnitKey {
        Arc::make_mut(&mut self.storage_units).insert(unit)
    }

    pub(crate) fn insert_movement(&mut self, movement: Movement) -> MovementKey {
        Arc::make_mut(&mut self.movements).insert(movement)
    }

    /// Insert a listing, enforcing one active listing per crate.
    pub(crate) fn insert_listing(
        &mut self,
        listing: MarketListing,
    ) -> Result<ListingKey, EngineError> {
        if listing.is_active() && self.active_listing_for_crate(listing.krate).is_some() {
            return Err(ConflictError::ActiveListingExists(listing.krate).into());
        }

        Ok(Arc::make_mut(&mut self.listings).insert(listing))
    }

    /// Append a price snapshot and make it the listing's current price.
    pub(crate) fn insert_listing_price(
        &mut self,
        price: ListingPrice,
    ) -> Result<ListingPriceKey, EngineError> {
        let listing = price.listing;

        self.listing(listing)?;

        let key = Arc::make_mut(&mut self.listing_prices).insert(price);
        self.listing_mut(listing)?.prices.push(key);

        Ok(key)
    }

    pub(crate) fn insert_order(&mut self, order: Order) -> OrderKey {
        Arc::make_mut(&mut self.orders).insert(order)
    }

    pub(crate) fn insert_line_item(&mut self, item: OrderLineItem) -> LineItemKey {
        Arc::make_mut(&mut self.line_items).insert(item)
    }

    pub(crate) fn remove_line_item(&mut self, key: LineItemKey) -> Option<OrderLineItem> {
        Arc::make_mut(&mut self.line_items).remove(key)
    }

    /// Insert a coupon, enforcing unique codes among active coupons.
    pub(crate) fn insert_coupon(&mut self, coupon: Coupon) -> Result<CouponKey, EngineError> {
        let taken = self
            .coupons
            .values()
            .any(|existing| existing.is_active() && existing.code == coupon.code);

        if taken {
            return Err(ConflictError::CouponCodeInUse(coupon.code).into());
        }

        Ok(Arc::make_mut(&mut self.coupons).insert(coupon))
    }

    pub(crate) fn insert_pickup(&mut self, pickup: PickupRecord) -> PickupKey {
        Arc::make_mut(&mut self.pickups).insert(pickup)
    }

    pub(crate) fn remove_pickup(&mut self, key: PickupKey) -> Option<PickupRecord> {
        Arc::make_mut(&mut self.pickups).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn cloned_store_copies_only_the_arenas_it_writes() -> TestResult {
        let mut original = Store::default();
        let kept = original.insert_storage_unit(StorageUnit::counted("Chiller", 4));

        let mut copy = original.clone();

        assert!(Arc::ptr_eq(&original.storage_units, &copy.storage_units));
        assert!(Arc::ptr_eq(&original.crates, &copy.crates));

        let added = copy.insert_storage_unit(StorageUnit::counted("Freezer", 2));

        assert!(
            !Arc::ptr_eq(&original.storage_units, &copy.storage_units),
            "writing to the copy must detach its arena"
        );
        assert!(
            Arc::ptr_eq(&original.crates, &copy.crates),
            "untouched arenas stay shared"
        );
        assert!(original.storage_unit(added).is_err());
        assert_eq!(copy.storage_unit(kept)?.name, "Chiller");

        Ok(())
    }

    #[test]
    fn missing_keys_do_not_detach_a_shared_arena() {
        let original = Store::default();
        let mut copy = original.clone();

        let result = copy.storage_unit_mut(StorageUnitKey::default());

        assert!(matches!(
            result,
            Err(EngineError::NotFound(EntityKind::StorageUnit))
        ));
        assert!(Arc::ptr_eq(&original.storage_units, &copy.storage_units));
    }
}
