//! Engine errors

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{crates::CrateKey, orders::OrderStatus, payments::GatewayError};

/// The kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Crate
    Crate,
    /// Produce
    Produce,
    /// Storage unit
    StorageUnit,
    /// Market listing
    Listing,
    /// Listing price snapshot
    ListingPrice,
    /// Order
    Order,
    /// Order line item
    LineItem,
    /// Coupon
    Coupon,
    /// Pickup record
    Pickup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Crate => "crate",
            EntityKind::Produce => "produce",
            EntityKind::StorageUnit => "storage unit",
            EntityKind::Listing => "listing",
            EntityKind::ListingPrice => "listing price",
            EntityKind::Order => "order",
            EntityKind::LineItem => "line item",
            EntityKind::Coupon => "coupon",
            EntityKind::Pickup => "pickup record",
        })
    }
}

/// Malformed input. Never retried.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Two related records carry different currencies (expected, actual).
    #[error("currency mismatch: expected {expected}, found {actual}")]
    CurrencyMismatch {
        /// Currency of the record being valued against
        expected: &'static str,
        /// Currency that was found
        actual: &'static str,
    },

    /// Unknown ISO currency code
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),

    /// A weight was negative or otherwise out of range.
    #[error("invalid weight: {0}")]
    InvalidWeight(Decimal),

    /// A price was negative.
    #[error("invalid price: {0}")]
    InvalidPrice(Decimal),

    /// A coupon percentage outside `(0, 1]`.
    #[error("coupon percentage must be greater than 0% and at most 100%")]
    InvalidPercentage,

    /// A coupon code was empty.
    #[error("coupon code must not be empty")]
    EmptyCouponCode,

    /// No coupon exists with the given code.
    #[error("coupon {0} not found")]
    UnknownCoupon(String),

    /// None of the order's line items can use the coupon.
    #[error("coupon {0} does not apply to any line item")]
    CouponNotApplicable(String),

    /// Checkout was attempted on an order without line items.
    #[error("order has no line items")]
    EmptyOrder,

    /// The line item belongs to another order.
    #[error("line item does not belong to this order")]
    ForeignLineItem,

    /// A pickup method was chosen for a storage unit the order doesn't use.
    #[error("storage unit is not referenced by this order")]
    UnreferencedStorageUnit,

    /// Amount too large to be expressed in minor units.
    #[error("amount {0} cannot be represented in minor units")]
    UnrepresentableAmount(Decimal),
}

/// An operation was attempted against an entity in the wrong lifecycle state.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidStateError {
    /// The order was not in the status the operation requires.
    #[error("expected status {expected}, got {actual}")]
    UnexpectedStatus {
        /// Required status
        expected: OrderStatus,
        /// Status the order was in
        actual: OrderStatus,
    },

    /// The listing has been delisted.
    #[error("listing has been delisted")]
    ListingDelisted,

    /// The coupon has been revoked.
    #[error("coupon {0} has been revoked")]
    CouponRevoked(String),
}

/// A uniqueness constraint was violated.
#[derive(Debug, Error, PartialEq)]
pub enum ConflictError {
    /// The crate already has an active listing.
    #[error("crate {0:?} already has an active listing")]
    ActiveListingExists(CrateKey),

    /// An active coupon already uses the code.
    #[error("coupon code {0} is already in use")]
    CouponCodeInUse(String),
}

/// Errors raised by engine operations.
///
/// Any error returned inside a transaction rolls the whole transaction back.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Wrong lifecycle state
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// Uniqueness violation
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// External payment gateway failure
    #[error(transparent)]
    PaymentGateway(#[from] GatewayError),

    /// A referenced record doesn't exist.
    #[error("{0} not found")]
    NotFound(EntityKind),
}

impl EngineError {
    /// The externally meaningful failure reason for this error.
    pub fn reason(&self) -> FailureReason {
        match self {
            EngineError::Validation(_) => FailureReason::BadRequest,
            EngineError::InvalidState(_) => FailureReason::Forbidden,
            EngineError::Conflict(_) => FailureReason::Conflict,
            EngineError::PaymentGateway(_) => FailureReason::Upstream,
            EngineError::NotFound(_) => FailureReason::NotFound,
        }
    }
}

/// Failure reasons exposed to callers outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The request was malformed.
    BadRequest,

    /// The request conflicts with existing state.
    Conflict,

    /// The request is not allowed in the current state.
    Forbidden,

    /// A referenced record doesn't exist.
    NotFound,

    /// A collaborating service failed.
    Upstream,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::BadRequest => "bad request",
            FailureReason::Conflict => "conflict",
            FailureReason::Forbidden => "forbidden",
            FailureReason::NotFound => "not found",
            FailureReason::Upstream => "upstream failure",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_status_message_names_both_statuses() {
        let error = InvalidStateError::UnexpectedStatus {
            expected: OrderStatus::PaymentPending,
            actual: OrderStatus::Cart,
        };

        assert_eq!(error.to_string(), "expected status PAYMENT_PENDING, got CART");
    }

    #[test]
    fn reasons_map_each_error_family() {
        let cases = [
            (
                EngineError::from(ValidationError::EmptyOrder),
                FailureReason::BadRequest,
            ),
            (
                EngineError::from(InvalidStateError::ListingDelisted),
                FailureReason::Forbidden,
            ),
            (
                EngineError::from(ConflictError::CouponCodeInUse("FRESH10".to_string())),
                FailureReason::Conflict,
            ),
            (
                EngineError::from(GatewayError::Unavailable),
                FailureReason::Upstream,
            ),
            (EngineError::NotFound(EntityKind::Order), FailureReason::NotFound),
        ];

        for (error, reason) in cases {
            assert_eq!(error.reason(), reason, "unexpected reason for {error:?}");
        }
    }

    #[test]
    fn failure_reason_display_hides_internal_detail() {
        let error = EngineError::from(ValidationError::CurrencyMismatch {
            expected: "KES",
            actual: "USD",
        });

        assert_eq!(error.reason().to_string(), "bad request");
    }
}
