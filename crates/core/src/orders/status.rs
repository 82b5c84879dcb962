//! Order status transitions
//!
//! Every transition checks the starting status first and fails without mutating anything if
//! it is wrong.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::{
    currency::floor_zero,
    errors::{EngineError, ValidationError},
    events::DomainEvent,
    listings::{ListingKey, recompute_listing},
    movements::check_out,
    orders::{LineItemKey, Order, OrderKey, OrderStatus, recompute_order, require_status},
    pickups::reconcile_pickups,
    recompute::RecomputeOptions,
    store::Transaction,
};

fn transition(
    tx: &mut Transaction<'_>,
    key: OrderKey,
    expected: OrderStatus,
    next: OrderStatus,
) -> Result<Order, EngineError> {
    let now = tx.now();
    let order = tx.store_mut().order_mut(key)?;

    require_status(order, expected)?;

    order.status = next;
    order.status_changed_at = now;

    info!(order_key = ?key, from = %expected, to = %next, "order status changed");

    Ok(order.clone())
}

/// Distinct listings referenced by an order's lines.
fn order_listings(tx: &Transaction<'_>, key: OrderKey) -> SmallVec<[ListingKey; 8]> {
    let mut listings = SmallVec::new();

    for (_, item) in tx.store().line_items_for_order(key) {
        if !listings.contains(&item.listing) {
            listings.push(item.listing);
        }
    }

    listings
}

fn recompute_order_listings(tx: &mut Transaction<'_>, key: OrderKey) -> Result<(), EngineError> {
    for listing in order_listings(tx, key) {
        recompute_listing(tx, listing, RecomputeOptions::PERSIST)?;
    }

    Ok(())
}

/// Shrink each cart line to what its listing can still cover, deleting lines that reach zero.
///
/// Other orders may have locked weight since the line was edited. Returns how many lines
/// changed.
fn clamp_lines_to_availability(
    tx: &mut Transaction<'_>,
    key: OrderKey,
) -> Result<usize, EngineError> {
    let lines: SmallVec<[(LineItemKey, ListingKey, Decimal); 8]> = tx
        .store()
        .line_items_for_order(key)
        .map(|(item_key, item)| (item_key, item.listing, item.weight))
        .collect();

    let mut clamped = 0_usize;
    let mut removed = 0_usize;

    for (item_key, listing, weight) in lines {
        let available = floor_zero(
            recompute_listing(tx, listing, RecomputeOptions::PERSIST)?.available_weight,
        );

        if weight <= available {
            continue;
        }

        clamped += 1;

        if available <= Decimal::ZERO {
            tx.store_mut().remove_line_item(item_key);
            removed += 1;
        } else {
            tx.store_mut().line_item_mut(item_key)?.weight = available;
        }

        debug!(
            order_key = ?key,
            line_item_key = ?item_key,
            requested = %weight,
            %available,
            "clamped line at checkout"
        );
    }

    if removed > 0 {
        reconcile_pickups(tx, key)?;
    }

    Ok(clamped)
}

/// Give up on a cart.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless the order is a cart.
pub fn abandon_cart(tx: &mut Transaction<'_>, key: OrderKey) -> Result<Order, EngineError> {
    let order = transition(tx, key, OrderStatus::Cart, OrderStatus::AbandonedCart)?;

    tx.emit(DomainEvent::CartAbandoned { order: key });

    Ok(order)
}

/// Freeze a cart and hand it to the payment gateway.
///
/// Lines are first shrunk to what their listings still have available, since orders that
/// checked out earlier may have locked weight; lines left with nothing are deleted. The cart
/// is then repriced one last time, the gateway registers the pending payment and hands back a
/// checkout URL, and every referenced listing is recomputed so the ordered weight is locked.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless the order is a cart, [`ValidationError::EmptyOrder`] if no line survives clamping, or
/// [`EngineError::PaymentGateway`] if the gateway fails.
pub fn begin_checkout(tx: &mut Transaction<'_>, key: OrderKey) -> Result<Order, EngineError> {
    require_status(tx.store().order(key)?, OrderStatus::Cart)?;

    clamp_lines_to_availability(tx, key)?;

    let order = recompute_order(tx, key, RecomputeOptions::PERSIST_CASCADE)?;

    if tx.store().line_items_for_order(key).next().is_none() {
        return Err(ValidationError::EmptyOrder.into());
    }

    let gateway = tx.gateway();

    gateway.set_pending_payment(key, order.totals.total, order.currency)?;
    let checkout_url = gateway.checkout_url(key)?;

    transition(tx, key, OrderStatus::Cart, OrderStatus::PaymentPending)?;
    tx.store_mut().order_mut(key)?.checkout_url = Some(checkout_url.clone());

    recompute_order_listings(tx, key)?;

    tx.emit(DomainEvent::CheckoutStarted {
        order: key,
        checkout_url,
    });

    Ok(tx.store().order(key)?.clone())
}

/// Record a completed payment.
///
/// The sold weight is checked out of each crate, so the physical weight replaces the lock.
/// A crate that has meanwhile lost weight only gives up what it still holds.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless payment is pending.
pub fn confirm_payment(tx: &mut Transaction<'_>, key: OrderKey) -> Result<Order, EngineError> {
    let order = transition(tx, key, OrderStatus::PaymentPending, OrderStatus::Paid)?;

    let mut sold: SmallVec<[_; 8]> = SmallVec::new();

    for (_, item) in tx.store().line_items_for_order(key) {
        let krate = tx.store().listing(item.listing)?.krate;

        sold.push((krate, item.weight));
    }

    for (krate, weight) in sold {
        let weight = weight.min(tx.store().krate(krate)?.weight);

        if weight > Decimal::ZERO {
            check_out(tx, krate, weight)?;
        }
    }

    recompute_order_listings(tx, key)?;

    tx.emit(DomainEvent::OrderPaid { order: key });

    Ok(order)
}

/// Record that payment was not completed in time, releasing the locked weight.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless payment is pending.
pub fn expire_payment(tx: &mut Transaction<'_>, key: OrderKey) -> Result<Order, EngineError> {
    let order = transition(tx, key, OrderStatus::PaymentPending, OrderStatus::PaymentExpired)?;

    recompute_order_listings(tx, key)?;

    tx.emit(DomainEvent::PaymentExpired { order: key });

    warn!(order_key = ?key, "payment expired");

    Ok(order)
}

/// Cancel an order awaiting payment, releasing the locked weight.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`](crate::errors::InvalidStateError::UnexpectedStatus)
/// unless payment is pending.
pub fn cancel_order(tx: &mut Transaction<'_>, key: OrderKey) -> Result<Order, EngineError> {
    let order = transition(tx, key, OrderStatus::PaymentPending, OrderStatus::Cancelled)?;

    recompute_order_listings(tx, key)?;

    tx.emit(DomainEvent::OrderCancelled { order: key });

    Ok(order)
}
