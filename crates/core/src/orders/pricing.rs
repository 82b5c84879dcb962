//! Order/Cart pricing

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{
    currency::{floor_zero, percent_of, round_amount},
    errors::EngineError,
    listings::recompute_listing,
    orders::{LineItemKey, LinePricing, Order, OrderKey, OrderLineItem, OrderStatus, OrderTotals},
    payments::GatewayQuote,
    pickups::reconcile_pickups,
    recompute::{Recompute, RecomputeOptions},
    store::Transaction,
};

/// Price one line.
///
/// Each amount is rounded half-up to the currency. The discount only applies to the produce
/// amount; cooling fees are never discounted.
pub fn price_line(
    weight: Decimal,
    price_per_kg: Decimal,
    fee_per_kg: Decimal,
    discount: Option<Percentage>,
    currency: &Currency,
) -> LinePricing {
    let produce_amount = round_amount(weight * price_per_kg, currency);
    let cooling_fee_amount = round_amount(weight * fee_per_kg, currency);
    let discount_amount =
        discount.map_or(Decimal::ZERO, |percent| percent_of(percent, produce_amount, currency));

    LinePricing {
        produce_amount,
        cooling_fee_amount,
        discount_amount,
        total_amount: floor_zero(produce_amount + cooling_fee_amount - discount_amount),
    }
}

/// Reprice a line item against its listing's current price and availability.
///
/// Lines of orders past [`OrderStatus::Cart`] are frozen and only persisted. With `cascade`,
/// the listing is recomputed first. The stored weight is priced as is, never re-clamped.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if the line, its order, listing or coupon is missing, or
/// the listing's error when cascading.
pub fn recompute_line_item(
    tx: &mut Transaction<'_>,
    key: LineItemKey,
    options: RecomputeOptions,
) -> Result<OrderLineItem, EngineError> {
    let mut item = tx.store().line_item(key)?.clone();
    let order = tx.store().order(item.order)?;

    if order.status != OrderStatus::Cart {
        return Ok(item);
    }

    let currency = order.currency;

    let listing = if options.cascade {
        let listing_options = RecomputeOptions {
            persist: options.persist,
            cascade: false,
        };

        recompute_listing(tx, item.listing, listing_options)?
    } else {
        tx.store().listing(item.listing)?.clone()
    };

    let price_per_kg = tx.store().current_price(item.listing)?.price_per_kg;

    // Revoked coupons stay attached but stop discounting.
    let discount = match item.coupon {
        Some(coupon) => {
            let coupon = tx.store().coupon(coupon)?;

            coupon.is_active().then_some(coupon.percentage)
        }
        None => None,
    };

    item.frozen_price_per_kg = price_per_kg;
    item.frozen_available_weight = listing.available_weight;
    item.pricing = price_line(
        item.weight,
        price_per_kg,
        listing.pending_fee_per_kg,
        discount,
        currency,
    );
    item.computed_at = Some(tx.now());

    trace!(line_item_key = ?key, total = %item.pricing.total_amount, "recomputed line item");

    if options.persist {
        *tx.store_mut().line_item_mut(key)? = item.clone();
    }

    Ok(item)
}

impl Recompute for LineItemKey {
    type Output = OrderLineItem;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<OrderLineItem, EngineError> {
        recompute_line_item(tx, self, options)
    }
}

/// Recompute an order's six totals.
///
/// Only carts are repriced. Zero-weight lines are deleted when persisting (and skipped
/// otherwise), after which pickup records are reconciled. Sums are rounded before the
/// platform fee is taken, and the fee-inclusive subtotal is rounded again before the payment
/// gateway adds its processor fee.
///
/// # Errors
///
/// Returns [`EngineError::PaymentGateway`] if the gateway fails, or any error from
/// recomputing the lines.
pub fn recompute_order(
    tx: &mut Transaction<'_>,
    key: OrderKey,
    options: RecomputeOptions,
) -> Result<Order, EngineError> {
    let mut order = tx.store().order(key)?.clone();

    if order.status != OrderStatus::Cart {
        return Ok(order);
    }

    let currency = order.currency;

    let items: SmallVec<[LineItemKey; 8]> = tx
        .store()
        .line_items_for_order(key)
        .map(|(item_key, _)| item_key)
        .collect();

    let mut produce = Decimal::ZERO;
    let mut cooling_fees = Decimal::ZERO;
    let mut discount = Decimal::ZERO;
    let mut subtotal = Decimal::ZERO;
    let mut removed = 0_usize;

    for item_key in items {
        if tx.store().line_item(item_key)?.weight <= Decimal::ZERO {
            if options.persist {
                tx.store_mut().remove_line_item(item_key);
                removed += 1;
            }

            continue;
        }

        let pricing = if options.cascade {
            recompute_line_item(tx, item_key, options)?.pricing
        } else {
            tx.store().line_item(item_key)?.pricing
        };

        produce += pricing.produce_amount;
        cooling_fees += pricing.cooling_fee_amount;
        discount += pricing.discount_amount;
        subtotal += pricing.total_amount;
    }

    if removed > 0 {
        reconcile_pickups(tx, key)?;
    }

    let produce = round_amount(produce, currency);
    let cooling_fees = round_amount(cooling_fees, currency);
    let discount = round_amount(discount, currency);
    let subtotal = round_amount(subtotal, currency);

    let platform_fee = percent_of(tx.config().platform_fee, subtotal, currency);
    let subtotal = round_amount(subtotal + platform_fee, currency);

    // Nothing to charge, so the gateway is not asked.
    let quote = if subtotal > Decimal::ZERO {
        tx.gateway()
            .compute_final_amount_and_processor_fee(subtotal, currency)?
    } else {
        GatewayQuote {
            final_amount: subtotal,
            processor_fee: Decimal::ZERO,
        }
    };

    order.totals = OrderTotals {
        produce: floor_zero(produce),
        cooling_fees: floor_zero(cooling_fees),
        discount: floor_zero(discount),
        platform_fee: floor_zero(platform_fee),
        payment_fees: floor_zero(round_amount(quote.processor_fee, currency)),
        total: floor_zero(round_amount(quote.final_amount, currency)),
    };
    order.computed_at = Some(tx.now());

    debug!(order_key = ?key, total = %order.totals.total, removed, "recomputed order");

    if options.persist {
        *tx.store_mut().order_mut(key)? = order.clone();
    }

    Ok(order)
}

impl Recompute for OrderKey {
    type Output = Order;

    fn recompute(
        self,
        tx: &mut Transaction<'_>,
        options: RecomputeOptions,
    ) -> Result<Order, EngineError> {
        recompute_order(tx, self, options)
    }
}
