//! Orders
//!
//! An order starts life as a mutable cart. Once payment begins it is frozen: its totals are
//! never repriced again, only persisted.

use std::fmt;

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use slotmap::new_key_type;

use crate::{
    coupons::CouponKey,
    currency::to_money,
    errors::{InvalidStateError, ValidationError},
    listings::ListingKey,
    uuids::UserUuid,
};

mod cart;
mod pricing;
mod status;

pub use cart::{CartEdit, UpdateStrategy, create_cart, edit_cart, remove_line_item};
pub use pricing::{price_line, recompute_line_item, recompute_order};
pub use status::{abandon_cart, begin_checkout, cancel_order, confirm_payment, expire_payment};

new_key_type! {
    /// Order Key
    pub struct OrderKey;
}

new_key_type! {
    /// Line Item Key
    pub struct LineItemKey;
}

/// Order lifecycle.
///
/// `Cart -> AbandonedCart`, `Cart -> PaymentPending`, then `PaymentPending` to one of `Paid`,
/// `PaymentExpired` or `Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Mutable cart
    #[default]
    Cart,

    /// Cart the buyer gave up on
    AbandonedCart,

    /// Waiting for the payment gateway
    PaymentPending,

    /// Paid
    Paid,

    /// Payment was not completed in time
    PaymentExpired,

    /// Cancelled while waiting for payment
    Cancelled,
}

impl OrderStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::AbandonedCart
                | OrderStatus::Paid
                | OrderStatus::PaymentExpired
                | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Cart => "CART",
            OrderStatus::AbandonedCart => "ABANDONED_CART",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::PaymentExpired => "PAYMENT_EXPIRED",
            OrderStatus::Cancelled => "CANCELLED",
        })
    }
}

/// The six computed order totals, all in the order's currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTotals {
    /// Produce amount after rounding
    pub produce: Decimal,

    /// Cooling fees carried over from the crates
    pub cooling_fees: Decimal,

    /// Coupon discounts
    pub discount: Decimal,

    /// Platform fee on the produce and cooling-fee subtotal
    pub platform_fee: Decimal,

    /// Payment processor fee
    pub payment_fees: Decimal,

    /// Amount due
    pub total: Decimal,
}

/// A cart or a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Buyer
    pub buyer: UserUuid,

    /// Lifecycle status
    pub status: OrderStatus,

    /// Currency every line must be priced in
    pub currency: &'static Currency,

    /// Computed totals
    pub totals: OrderTotals,

    /// Where the buyer completes payment, once checkout has begun
    pub checkout_url: Option<String>,

    /// When the cart was created
    pub created_at: Timestamp,

    /// When the status last changed
    pub status_changed_at: Timestamp,

    /// When the totals were last computed
    pub computed_at: Option<Timestamp>,
}

impl Order {
    /// The amount due as [`Money`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnrepresentableAmount`] if the total does not fit in minor
    /// units.
    pub fn total_money(&self) -> Result<Money<'static, Currency>, ValidationError> {
        to_money(self.totals.total, self.currency)
    }
}

/// Computed amounts for one line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePricing {
    /// Weight times the frozen price per kg
    pub produce_amount: Decimal,

    /// Cooling fee carried over for the reserved weight
    pub cooling_fee_amount: Decimal,

    /// Coupon discount on the produce amount
    pub discount_amount: Decimal,

    /// Line total before platform and processor fees
    pub total_amount: Decimal,
}

/// One listing's reserved quantity within an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLineItem {
    /// Owning order
    pub order: OrderKey,

    /// Listing the weight is reserved from
    pub listing: ListingKey,

    /// Requested weight (kg)
    pub weight: Decimal,

    /// Whether the buyer asked for everything available
    pub entire_crate: bool,

    /// Attached coupon
    pub coupon: Option<CouponKey>,

    /// Listing price per kg when the line was last priced
    pub frozen_price_per_kg: Decimal,

    /// Listing availability when the line was last priced
    pub frozen_available_weight: Decimal,

    /// Computed amounts
    pub pricing: LinePricing,

    /// When the line was last priced
    pub computed_at: Option<Timestamp>,
}

/// Check an order is in `expected` before transitioning or editing it.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`] otherwise.
pub fn require_status(order: &Order, expected: OrderStatus) -> Result<(), InvalidStateError> {
    if order.status != expected {
        return Err(InvalidStateError::UnexpectedStatus {
            expected,
            actual: order.status,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::KES;
    use testresult::TestResult;

    use super::*;

    fn order(status: OrderStatus) -> Order {
        Order {
            buyer: UserUuid::new(),
            status,
            currency: KES,
            totals: OrderTotals::default(),
            checkout_url: None,
            created_at: Timestamp::UNIX_EPOCH,
            status_changed_at: Timestamp::UNIX_EPOCH,
            computed_at: None,
        }
    }

    #[test]
    fn require_status_names_both_states() {
        let message = require_status(&order(OrderStatus::Paid), OrderStatus::PaymentPending)
            .err()
            .map(|error| error.to_string());

        assert_eq!(
            message.as_deref(),
            Some("expected status PAYMENT_PENDING, got PAID")
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!OrderStatus::Cart.is_terminal());
        assert!(!OrderStatus::PaymentPending.is_terminal());
        assert!(OrderStatus::AbandonedCart.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::PaymentExpired.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn total_money_uses_order_currency() -> TestResult {
        let mut order = order(OrderStatus::Cart);
        order.totals.total = Decimal::new(3_150, 2);

        assert_eq!(order.total_money()?, Money::from_minor(3_150, KES));

        Ok(())
    }
}
