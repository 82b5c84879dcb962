//! Coldroom prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    config::{ConfigError, EngineConfig},
    coupons::{Coupon, CouponKey, CouponOwner, NewCoupon},
    crates::{Crate, CrateKey},
    engine::Engine,
    errors::{
        ConflictError, EngineError, EntityKind, FailureReason, InvalidStateError, ValidationError,
    },
    events::{DomainEvent, EventSink, NoopEventSink},
    fees::{CoolingFeePolicy, FeeLedger, FeeQuery, PolicyFeeLedger},
    listings::{ListingKey, ListingPrice, ListingPriceKey, MarketListing, NewListing},
    movements::{Movement, MovementKey, MovementKind, NewProduce},
    orders::{
        CartEdit, LineItemKey, LinePricing, Order, OrderKey, OrderLineItem, OrderStatus,
        OrderTotals, UpdateStrategy,
    },
    payments::{GatewayError, GatewayQuote, PaymentGateway, PercentageFeeGateway},
    pickups::{PickupKey, PickupMethod, PickupRecord},
    produce::{Produce, ProduceKey},
    recompute::{Recompute, RecomputeOptions},
    storage_units::{CapacityMetric, CrateDimensions, StorageUnit, StorageUnitKey},
    store::{Store, Transaction},
    uuids::{CompanyUuid, TypedUuid, UserUuid},
};
