//! Market Listing Valuator
//!
//! A listing offers a crate's weight for sale. Its price lives in append-only
//! [`ListingPrice`] snapshots; its availability is the crate weight not yet locked by orders
//! awaiting payment.

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use slotmap::new_key_type;
use smallvec::SmallVec;
use tracing::{debug, info, trace};

use crate::{
    crates::CrateKey,
    currency::{ensure_currency, floor_zero, round_amount},
    errors::{EngineError, InvalidStateError, ValidationError},
    events::DomainEvent,
    fees::FeeQuery,
    orders::{OrderKey, OrderStatus, recompute_order},
    pickups::reconcile_pickups,
    recompute::{Recompute, RecomputeOptions},
    store::Transaction,
    uuids::{CompanyUuid, UserUuid},
};

new_key_type! {
    /// Listing Key
    pub struct ListingKey;
}

new_key_type! {
    /// Listing Price Key
    pub struct ListingPriceKey;
}

/// A crate offered for sale.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketListing {
    /// Crate on offer
    pub krate: CrateKey,

    /// Seller
    pub seller: UserUuid,

    /// Company the seller trades for, if any
    pub company: Option<CompanyUuid>,

    /// Currency the listing is priced in
    pub currency: &'static Currency,

    /// Price snapshots, oldest first
    pub prices: SmallVec<[ListingPriceKey; 4]>,

    /// Outstanding cooling fee per kg of the crate
    pub pending_fee_per_kg: Decimal,

    /// Outstanding cooling fee for the crate's current weight
    pub pending_fees: Decimal,

    /// Weight reserved by orders awaiting payment (kg)
    pub locked_weight: Decimal,

    /// Weight still available to buyers (kg)
    pub available_weight: Decimal,

    /// When the listing was created
    pub created_at: Timestamp,

    /// When the listing was withdrawn; `None` while active
    pub delisted_at: Option<Timestamp>,

    /// When the aggregates were last computed
    pub computed_at: Option<Timestamp>,
}

impl MarketListing {
    /// Whether the listing is still on offer.
    pub fn is_active(&self) -> bool {
        self.delisted_at.is_none()
    }
}

/// An immutable price snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPrice {
    /// Listing the price belongs to
    pub listing: ListingKey,

    /// Price per kg
    pub price_per_kg: Decimal,

    /// Who set the price
    pub created_by: UserUuid,

    /// When the price was set
    pub created_at: Timestamp,
}

/// A request to list a crate for sale.
#[derive(Debug, Clone)]
pub struct NewListing {
    /// Crate to list
    pub krate: CrateKey,

    /// Seller
    pub seller: UserUuid,

    /// Company the seller trades for, if any
    pub company: Option<CompanyUuid>,

    /// Listing currency; must match the crate's
    pub currency: &'static Currency,

    /// Opening price per kg
    pub price_per_kg: Decimal,
}

/// Recompute a listing's pending fees, locked weight and available weight.
///
/// Locked weight only counts orders in [`OrderStatus::PaymentPending`]; carts reserve
/// nothing. Never cascades: the crate is upstream of the listing.
///
/// # Errors
///
/// Returns [`ValidationError::CurrencyMismatch`] if the crate and listing currencies differ,
/// or [`EngineError::NotFound`] if the listing or its crate is missing.
pub fn recompute_listing(
    tx: &mut Transaction<'_>,
    key: ListingKey,
    options: RecomputeOptions,
) -> Result<MarketListing, EngineError> {
    let now = tx.now();
    let mut listing = tx.store().listing(key)?.clone();
    let krate = tx.store().krate(listing.krate)?;

    ensure_currency(listing.currency, krate.currency)?;

    let pending_fee_per_kg = {
        let query = FeeQuery::collect(tx.store(), listing.krate, now)?;

        tx.fees().due_fee_per_unit_mass(&query)
    };

    let mut locked = Decimal::ZERO;

    for (_, item) in tx.store().line_items_for_listing(key) {
        if tx.store().order(item.order)?.status == OrderStatus::PaymentPending {
            locked += item.weight;
        }
    }

    listing.pending_fee_per_kg = pending_fee_per_kg;
    listing.pending_fees = round_amount(pending_fee_per_kg * krate.weight, listing.currency);
    listing.locked_weight = floor_zero(locked);
    listing.available_weight = floor_zero(krate.weight - listing.locked_weight);
    listing.computed_at = Some(now);

    trace!(
        listing_key = ?key,
        locked = %listing.locked_weight,
        available = %listing.available_weight,
        "recomputed listing"
    );

    if options.persist {
        *tx.store_mut().listing_mut(key)? = listing.clone();
    }

    Ok(listing)
}

impl Recompute for ListingKey {
    type Output = MarketListing;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<MarketListing, EngineError> {
        recompute_listing(tx, self, options)
    }
}

/// List a crate for sale with an opening price.
///
/// # Errors
///
/// Returns [`ConflictError::ActiveListingExists`](crate::errors::ConflictError::ActiveListingExists)
/// if the crate is already listed, [`ValidationError::InvalidPrice`] for a negative price, or
/// [`ValidationError::CurrencyMismatch`] if the currency differs from the crate's.
pub fn create_listing(tx: &mut Transaction<'_>, new: NewListing) -> Result<ListingKey, EngineError> {
    if new.price_per_kg.is_sign_negative() {
        return Err(ValidationError::InvalidPrice(new.price_per_kg).into());
    }

    let now = tx.now();

    tx.store().krate(new.krate)?;

    let key = tx.store_mut().insert_listing(MarketListing {
        krate: new.krate,
        seller: new.seller,
        company: new.company,
        currency: new.currency,
        prices: SmallVec::new(),
        pending_fee_per_kg: Decimal::ZERO,
        pending_fees: Decimal::ZERO,
        locked_weight: Decimal::ZERO,
        available_weight: Decimal::ZERO,
        created_at: now,
        delisted_at: None,
        computed_at: None,
    })?;

    tx.store_mut().insert_listing_price(ListingPrice {
        listing: key,
        price_per_kg: new.price_per_kg,
        created_by: new.seller,
        created_at: now,
    })?;

    recompute_listing(tx, key, RecomputeOptions::PERSIST)?;

    tx.emit(DomainEvent::ListingCreated { listing: key });

    info!(listing_key = ?key, crate_key = ?new.krate, "created listing");

    Ok(key)
}

/// Reprice a listing by appending a new snapshot.
///
/// Carts pick the new price up on their next recompute.
///
/// # Errors
///
/// Returns [`InvalidStateError::ListingDelisted`] for a delisted listing or
/// [`ValidationError::InvalidPrice`] for a negative price.
pub fn change_listing_price(
    tx: &mut Transaction<'_>,
    key: ListingKey,
    price_per_kg: Decimal,
    created_by: UserUuid,
) -> Result<ListingPriceKey, EngineError> {
    if !tx.store().listing(key)?.is_active() {
        return Err(InvalidStateError::ListingDelisted.into());
    }

    if price_per_kg.is_sign_negative() {
        return Err(ValidationError::InvalidPrice(price_per_kg).into());
    }

    let now = tx.now();

    let price = tx.store_mut().insert_listing_price(ListingPrice {
        listing: key,
        price_per_kg,
        created_by,
        created_at: now,
    })?;

    tx.emit(DomainEvent::ListingPriceChanged {
        listing: key,
        price_per_kg,
    });

    debug!(listing_key = ?key, %price_per_kg, "repriced listing");

    Ok(price)
}

/// Withdraw a listing from sale.
///
/// Cart lines for the listing are removed and the affected carts recomputed. Orders already
/// awaiting payment keep their lines and their lock.
///
/// # Errors
///
/// Returns [`InvalidStateError::ListingDelisted`] if the listing is already delisted.
pub fn delist(tx: &mut Transaction<'_>, key: ListingKey) -> Result<MarketListing, EngineError> {
    if !tx.store().listing(key)?.is_active() {
        return Err(InvalidStateError::ListingDelisted.into());
    }

    let now = tx.now();

    tx.store_mut().listing_mut(key)?.delisted_at = Some(now);

    let mut cart_lines = SmallVec::<[_; 4]>::new();

    for (item_key, item) in tx.store().line_items_for_listing(key) {
        if tx.store().order(item.order)?.status == OrderStatus::Cart {
            cart_lines.push((item_key, item.order));
        }
    }

    let mut carts: SmallVec<[OrderKey; 4]> = SmallVec::new();

    for (item_key, order) in cart_lines {
        tx.store_mut().remove_line_item(item_key);

        if !carts.contains(&order) {
            carts.push(order);
        }
    }

    for order in carts.iter().copied() {
        reconcile_pickups(tx, order)?;
        recompute_order(tx, order, RecomputeOptions::PERSIST_CASCADE)?;
    }

    let listing = recompute_listing(tx, key, RecomputeOptions::PERSIST)?;

    tx.emit(DomainEvent::ListingDelisted { listing: key });

    info!(listing_key = ?key, carts = carts.len(), "delisted listing");

    Ok(listing)
}
