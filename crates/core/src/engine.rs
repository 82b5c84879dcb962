//! Engine
//!
//! The engine owns the store and its collaborators. Every boundary operation runs inside
//! [`Engine::with_transaction`], so either all of its writes and events land or none do.

use std::fmt;

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    coupons::{self, CouponKey, NewCoupon},
    crates::{Crate, CrateKey},
    errors::EngineError,
    events::{EventSink, NoopEventSink},
    fees::FeeLedger,
    listings::{self, ListingKey, ListingPriceKey, MarketListing, NewListing},
    movements::{self, NewProduce},
    orders::{self, CartEdit, LineItemKey, Order, OrderKey},
    payments::PaymentGateway,
    pickups::{self, PickupKey, PickupMethod},
    produce::ProduceKey,
    recompute::{Recompute, RecomputeOptions},
    storage_units::{StorageUnit, StorageUnitKey, recompute_storage_unit},
    store::{Store, Transaction},
    uuids::UserUuid,
};

type Clock = Box<dyn Fn() -> Timestamp + Send + Sync>;

/// Inventory and marketplace valuation engine.
pub struct Engine {
    store: Store,
    config: EngineConfig,
    fees: Box<dyn FeeLedger>,
    gateway: Box<dyn PaymentGateway>,
    events: Box<dyn EventSink>,
    clock: Clock,
}

impl Engine {
    /// Create an engine with an empty store.
    pub fn new(
        config: EngineConfig,
        fees: impl FeeLedger + 'static,
        gateway: impl PaymentGateway + 'static,
    ) -> Self {
        Self {
            store: Store::default(),
            config,
            fees: Box::new(fees),
            gateway: Box::new(gateway),
            events: Box::new(NoopEventSink),
            clock: Box::new(Timestamp::now),
        }
    }

    /// Publish committed events to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    /// Read the current time from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Committed state.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` in a transaction.
    ///
    /// On `Ok` the transaction's store replaces the committed one and its buffered events are
    /// published; on `Err` everything it did is discarded.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, EngineError>,
    {
        let now = (self.clock)();

        let mut tx = Transaction::begin(
            self.store.clone(),
            now,
            &self.config,
            self.fees.as_ref(),
            self.gateway.as_ref(),
        );

        match f(&mut tx) {
            Ok(value) => {
                let (store, events) = tx.into_parts();

                self.store = store;

                debug!(events = events.len(), "committed transaction");

                for event in &events {
                    self.events.publish(event);
                }

                Ok(value)
            }
            Err(error) => {
                warn!(%error, reason = %error.reason(), "rolled back transaction");

                Err(error)
            }
        }
    }

    /// Recompute one entity's cached aggregates.
    ///
    /// # Errors
    ///
    /// Returns the entity's recompute error.
    pub fn recompute<K: Recompute>(
        &mut self,
        key: K,
        options: RecomputeOptions,
    ) -> Result<K::Output, EngineError> {
        self.with_transaction(|tx| key.recompute(tx, options))
    }

    /// Register a storage unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the new unit cannot be recomputed.
    #[tracing::instrument(
        name = "engine.add_storage_unit",
        skip(self, unit),
        fields(name = %unit.name),
        err
    )]
    pub fn add_storage_unit(&mut self, unit: StorageUnit) -> Result<StorageUnitKey, EngineError> {
        self.with_transaction(|tx| {
            let key = tx.store_mut().insert_storage_unit(unit);

            recompute_storage_unit(tx, key, RecomputeOptions::PERSIST)?;

            Ok(key)
        })
    }

    /// Check produce into storage.
    ///
    /// # Errors
    ///
    /// See [`movements::check_in`].
    #[tracing::instrument(
        name = "engine.check_in",
        skip(self, new),
        fields(crop = %new.crop, crates = new.crate_weights.len()),
        err
    )]
    pub fn check_in(
        &mut self,
        new: NewProduce,
    ) -> Result<(ProduceKey, SmallVec<[CrateKey; 8]>), EngineError> {
        self.with_transaction(|tx| movements::check_in(tx, new))
    }

    /// Withdraw weight from a crate.
    ///
    /// # Errors
    ///
    /// See [`movements::check_out`].
    #[tracing::instrument(
        name = "engine.check_out",
        skip(self, krate, weight),
        fields(crate_key = ?krate, %weight),
        err
    )]
    pub fn check_out(&mut self, krate: CrateKey, weight: Decimal) -> Result<Crate, EngineError> {
        self.with_transaction(|tx| movements::check_out(tx, krate, weight))
    }

    /// List a crate for sale.
    ///
    /// # Errors
    ///
    /// See [`listings::create_listing`].
    #[tracing::instrument(
        name = "engine.create_listing",
        skip(self, new),
        fields(crate_key = ?new.krate, seller = %new.seller),
        err
    )]
    pub fn create_listing(&mut self, new: NewListing) -> Result<ListingKey, EngineError> {
        self.with_transaction(|tx| listings::create_listing(tx, new))
    }

    /// Reprice a listing.
    ///
    /// # Errors
    ///
    /// See [`listings::change_listing_price`].
    #[tracing::instrument(
        name = "engine.change_listing_price",
        skip(self, listing, price_per_kg, created_by),
        fields(listing_key = ?listing, %price_per_kg),
        err
    )]
    pub fn change_listing_price(
        &mut self,
        listing: ListingKey,
        price_per_kg: Decimal,
        created_by: UserUuid,
    ) -> Result<ListingPriceKey, EngineError> {
        self.with_transaction(|tx| {
            listings::change_listing_price(tx, listing, price_per_kg, created_by)
        })
    }

    /// Withdraw a listing from sale.
    ///
    /// # Errors
    ///
    /// See [`listings::delist`].
    #[tracing::instrument(name = "engine.delist", skip(self, listing), fields(listing_key = ?listing), err)]
    pub fn delist(&mut self, listing: ListingKey) -> Result<MarketListing, EngineError> {
        self.with_transaction(|tx| listings::delist(tx, listing))
    }

    /// Issue a coupon.
    ///
    /// # Errors
    ///
    /// See [`coupons::create_coupon`].
    #[tracing::instrument(
        name = "engine.create_coupon",
        skip(self, new),
        fields(code = %new.code),
        err
    )]
    pub fn create_coupon(&mut self, new: NewCoupon) -> Result<CouponKey, EngineError> {
        self.with_transaction(|tx| coupons::create_coupon(tx, new))
    }

    /// Revoke a coupon.
    ///
    /// # Errors
    ///
    /// See [`coupons::revoke_coupon`].
    #[tracing::instrument(name = "engine.revoke_coupon", skip(self), err)]
    pub fn revoke_coupon(&mut self, code: &str) -> Result<CouponKey, EngineError> {
        self.with_transaction(|tx| coupons::revoke_coupon(tx, code))
    }

    /// Open an empty cart.
    ///
    /// # Errors
    ///
    /// Opening a cart cannot fail; the `Result` matches the other boundary operations.
    #[tracing::instrument(
        name = "engine.create_cart",
        skip(self, buyer, currency),
        fields(%buyer, currency = currency.iso_alpha_code),
        err
    )]
    pub fn create_cart(
        &mut self,
        buyer: UserUuid,
        currency: &'static Currency,
    ) -> Result<OrderKey, EngineError> {
        self.with_transaction(|tx| Ok(orders::create_cart(tx, buyer, currency)))
    }

    /// Change one listing's line in a cart.
    ///
    /// # Errors
    ///
    /// See [`orders::edit_cart`].
    #[tracing::instrument(
        name = "engine.edit_cart",
        skip(self, edit),
        fields(order_key = ?order, listing_key = ?edit.listing, strategy = ?edit.strategy),
        err
    )]
    pub fn edit_cart(&mut self, order: OrderKey, edit: CartEdit) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::edit_cart(tx, order, edit))
    }

    /// Remove a line from a cart.
    ///
    /// # Errors
    ///
    /// See [`orders::remove_line_item`].
    #[tracing::instrument(
        name = "engine.remove_line_item",
        skip(self, order, item),
        fields(order_key = ?order, line_item_key = ?item),
        err
    )]
    pub fn remove_line_item(
        &mut self,
        order: OrderKey,
        item: LineItemKey,
    ) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::remove_line_item(tx, order, item))
    }

    /// Attach a coupon to a cart.
    ///
    /// # Errors
    ///
    /// See [`coupons::apply_coupon`].
    #[tracing::instrument(name = "engine.apply_coupon", skip(self, order), fields(order_key = ?order), err)]
    pub fn apply_coupon(&mut self, order: OrderKey, code: &str) -> Result<Order, EngineError> {
        self.with_transaction(|tx| coupons::apply_coupon(tx, order, code))
    }

    /// Detach a coupon from a cart.
    ///
    /// # Errors
    ///
    /// See [`coupons::clear_coupon`].
    #[tracing::instrument(name = "engine.clear_coupon", skip(self, order), fields(order_key = ?order), err)]
    pub fn clear_coupon(&mut self, order: OrderKey, code: &str) -> Result<Order, EngineError> {
        self.with_transaction(|tx| coupons::clear_coupon(tx, order, code))
    }

    /// Choose how produce from one storage unit is collected.
    ///
    /// # Errors
    ///
    /// See [`pickups::set_pickup_method`].
    #[tracing::instrument(
        name = "engine.set_pickup_method",
        skip(self, order, storage_unit),
        fields(order_key = ?order, storage_unit_key = ?storage_unit),
        err
    )]
    pub fn set_pickup_method(
        &mut self,
        order: OrderKey,
        storage_unit: StorageUnitKey,
        method: PickupMethod,
    ) -> Result<PickupKey, EngineError> {
        self.with_transaction(|tx| pickups::set_pickup_method(tx, order, storage_unit, method))
    }

    /// Abandon a cart.
    ///
    /// # Errors
    ///
    /// See [`orders::abandon_cart`].
    #[tracing::instrument(name = "engine.abandon_cart", skip(self, order), fields(order_key = ?order), err)]
    pub fn abandon_cart(&mut self, order: OrderKey) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::abandon_cart(tx, order))
    }

    /// Start payment for a cart.
    ///
    /// # Errors
    ///
    /// See [`orders::begin_checkout`].
    #[tracing::instrument(name = "engine.begin_checkout", skip(self, order), fields(order_key = ?order), err)]
    pub fn begin_checkout(&mut self, order: OrderKey) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::begin_checkout(tx, order))
    }

    /// Record a completed payment.
    ///
    /// # Errors
    ///
    /// See [`orders::confirm_payment`].
    #[tracing::instrument(name = "engine.confirm_payment", skip(self, order), fields(order_key = ?order), err)]
    pub fn confirm_payment(&mut self, order: OrderKey) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::confirm_payment(tx, order))
    }

    /// Record an expired payment.
    ///
    /// # Errors
    ///
    /// See [`orders::expire_payment`].
    #[tracing::instrument(name = "engine.expire_payment", skip(self, order), fields(order_key = ?order), err)]
    pub fn expire_payment(&mut self, order: OrderKey) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::expire_payment(tx, order))
    }

    /// Cancel an order awaiting payment.
    ///
    /// # Errors
    ///
    /// See [`orders::cancel_order`].
    #[tracing::instrument(name = "engine.cancel_order", skip(self, order), fields(order_key = ?order), err)]
    pub fn cancel_order(&mut self, order: OrderKey) -> Result<Order, EngineError> {
        self.with_transaction(|tx| orders::cancel_order(tx, order))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
