//! Cart editing

use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use tracing::{debug, info};

use crate::{
    currency::{ensure_currency, floor_zero},
    errors::{EngineError, InvalidStateError, ValidationError},
    listings::{ListingKey, recompute_listing},
    orders::{
        LineItemKey, LinePricing, Order, OrderKey, OrderLineItem, OrderStatus, OrderTotals,
        recompute_order, require_status,
    },
    pickups::{ensure_pickup, reconcile_pickups},
    recompute::RecomputeOptions,
    store::Transaction,
    uuids::UserUuid,
};

/// How a cart edit combines with the weight already in the cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Set the line to the requested weight.
    #[default]
    Replace,

    /// Add the requested weight to the line.
    Increase,

    /// Take the requested weight off the line.
    Decrease,
}

/// A change to one listing's line in a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartEdit {
    /// Listing to reserve from
    pub listing: ListingKey,

    /// Weight delta or target (kg), depending on the strategy
    pub weight: Decimal,

    /// How `weight` combines with the current line
    pub strategy: UpdateStrategy,

    /// Reserve everything the listing has available, ignoring `weight`
    pub entire_crate: bool,
}

impl CartEdit {
    /// Set the listing's line to `weight` kg.
    pub fn replace(listing: ListingKey, weight: Decimal) -> Self {
        Self {
            listing,
            weight,
            strategy: UpdateStrategy::Replace,
            entire_crate: false,
        }
    }

    /// Add `weight` kg to the listing's line.
    pub fn increase(listing: ListingKey, weight: Decimal) -> Self {
        Self {
            strategy: UpdateStrategy::Increase,
            ..Self::replace(listing, weight)
        }
    }

    /// Take `weight` kg off the listing's line.
    pub fn decrease(listing: ListingKey, weight: Decimal) -> Self {
        Self {
            strategy: UpdateStrategy::Decrease,
            ..Self::replace(listing, weight)
        }
    }

    /// Reserve the listing's whole available weight.
    pub fn entire_crate(listing: ListingKey) -> Self {
        Self {
            entire_crate: true,
            ..Self::replace(listing, Decimal::ZERO)
        }
    }

    /// The requested weight, clamped into `[0, available]`.
    pub fn target_weight(&self, current: Decimal, available: Decimal) -> Decimal {
        let requested = if self.entire_crate {
            available
        } else {
            match self.strategy {
                UpdateStrategy::Replace => self.weight,
                UpdateStrategy::Increase => current + self.weight,
                UpdateStrategy::Decrease => current - self.weight,
            }
        };

        floor_zero(requested).min(floor_zero(available))
    }
}

/// Open an empty cart for a buyer.
pub fn create_cart(
    tx: &mut Transaction<'_>,
    buyer: UserUuid,
    currency: &'static Currency,
) -> OrderKey {
    let now = tx.now();

    let key = tx.store_mut().insert_order(Order {
        buyer,
        status: OrderStatus::Cart,
        currency,
        totals: OrderTotals::default(),
        checkout_url: None,
        created_at: now,
        status_changed_at: now,
        computed_at: None,
    });

    debug!(order_key = ?key, %buyer, "created cart");

    key
}

/// Add, change or remove weight from one listing's line in a cart.
///
/// The new weight is clamped into `[0, listing.available_weight]`. A line that ends up empty
/// is deleted and its pickup records pruned; otherwise the line's storage unit gets a pickup
/// record. The order is then recomputed with cascade.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`] unless the order is a cart,
/// [`InvalidStateError::ListingDelisted`] for a delisted listing,
/// [`ValidationError::InvalidWeight`] for a negative weight, or
/// [`ValidationError::CurrencyMismatch`] if the listing is priced in another currency.
pub fn edit_cart(
    tx: &mut Transaction<'_>,
    key: OrderKey,
    edit: CartEdit,
) -> Result<Order, EngineError> {
    let order = tx.store().order(key)?;

    require_status(order, OrderStatus::Cart)?;

    let order_currency = order.currency;

    if edit.weight.is_sign_negative() {
        return Err(ValidationError::InvalidWeight(edit.weight).into());
    }

    let listing = recompute_listing(tx, edit.listing, RecomputeOptions::PERSIST)?;

    if !listing.is_active() {
        return Err(InvalidStateError::ListingDelisted.into());
    }

    ensure_currency(order_currency, listing.currency)?;

    let existing = tx.store().line_item_for(key, edit.listing);

    let current = match existing {
        Some(item_key) => tx.store().line_item(item_key)?.weight,
        None => Decimal::ZERO,
    };

    let weight = edit.target_weight(current, listing.available_weight);

    match existing {
        Some(item_key) if weight <= Decimal::ZERO => {
            tx.store_mut().remove_line_item(item_key);
            reconcile_pickups(tx, key)?;
        }
        Some(item_key) => {
            let item = tx.store_mut().line_item_mut(item_key)?;

            item.weight = weight;
            item.entire_crate = edit.entire_crate;
        }
        None if weight > Decimal::ZERO => {
            tx.store_mut().insert_line_item(OrderLineItem {
                order: key,
                listing: edit.listing,
                weight,
                entire_crate: edit.entire_crate,
                coupon: None,
                frozen_price_per_kg: Decimal::ZERO,
                frozen_available_weight: listing.available_weight,
                pricing: LinePricing::default(),
                computed_at: None,
            });
        }
        None => {}
    }

    if weight > Decimal::ZERO {
        let storage_unit = tx.store().krate(listing.krate)?.storage_unit;

        ensure_pickup(tx, key, storage_unit);
    }

    debug!(
        order_key = ?key,
        listing_key = ?edit.listing,
        requested = %edit.weight,
        stored = %weight,
        "edited cart"
    );

    recompute_order(tx, key, RecomputeOptions::PERSIST_CASCADE)
}

/// Remove a line from a cart.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`] unless the order is a cart, or
/// [`ValidationError::ForeignLineItem`] if the line belongs to another order.
pub fn remove_line_item(
    tx: &mut Transaction<'_>,
    key: OrderKey,
    item: LineItemKey,
) -> Result<Order, EngineError> {
    require_status(tx.store().order(key)?, OrderStatus::Cart)?;

    if tx.store().line_item(item)?.order != key {
        return Err(ValidationError::ForeignLineItem.into());
    }

    tx.store_mut().remove_line_item(item);
    reconcile_pickups(tx, key)?;

    info!(order_key = ?key, line_item_key = ?item, "removed line item");

    recompute_order(tx, key, RecomputeOptions::PERSIST_CASCADE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kg(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    #[test]
    fn increase_is_clamped_to_available_weight() {
        let edit = CartEdit::increase(ListingKey::default(), kg(20));

        assert_eq!(edit.target_weight(kg(5), kg(15)), kg(15));
    }

    #[test]
    fn decrease_never_goes_negative() {
        let edit = CartEdit::decrease(ListingKey::default(), kg(8));

        assert_eq!(edit.target_weight(kg(5), kg(15)), Decimal::ZERO);
        assert_eq!(edit.target_weight(kg(12), kg(15)), kg(4));
    }

    #[test]
    fn replace_ignores_current_weight() {
        let edit = CartEdit::replace(ListingKey::default(), kg(7));

        assert_eq!(edit.target_weight(kg(5), kg(15)), kg(7));
        assert_eq!(edit.target_weight(kg(5), kg(3)), kg(3));
    }

    #[test]
    fn entire_crate_takes_everything_available() {
        let edit = CartEdit::entire_crate(ListingKey::default());

        assert_eq!(edit.target_weight(kg(2), kg(15)), kg(15));
        assert_eq!(edit.target_weight(kg(2), Decimal::ZERO), Decimal::ZERO);
    }
}
