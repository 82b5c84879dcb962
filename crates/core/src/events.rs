//! Domain events
//!
//! Mutations emit events for notification delivery, which lives outside the engine. Events
//! are buffered per transaction and published only after it commits.

use mockall::automock;
use rust_decimal::Decimal;

use crate::{
    crates::CrateKey, listings::ListingKey, orders::OrderKey, produce::ProduceKey,
};

/// Something that happened to the marketplace or the stored stock.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// Produce was checked into storage.
    ProduceCheckedIn {
        /// Intake batch
        produce: ProduceKey,
    },

    /// Weight was checked out of a crate.
    CrateCheckedOut {
        /// Crate
        krate: CrateKey,
        /// Weight withdrawn (kg)
        weight: Decimal,
        /// Cooling fee settled
        fee_paid: Decimal,
    },

    /// A crate was listed for sale.
    ListingCreated {
        /// Listing
        listing: ListingKey,
    },

    /// A listing was repriced.
    ListingPriceChanged {
        /// Listing
        listing: ListingKey,
        /// New price per kg
        price_per_kg: Decimal,
    },

    /// A listing was withdrawn from sale.
    ListingDelisted {
        /// Listing
        listing: ListingKey,
    },

    /// A cart was abandoned by its buyer.
    CartAbandoned {
        /// Order
        order: OrderKey,
    },

    /// Payment was requested for an order.
    CheckoutStarted {
        /// Order
        order: OrderKey,
        /// Where the buyer completes payment
        checkout_url: String,
    },

    /// Payment was received.
    OrderPaid {
        /// Order
        order: OrderKey,
    },

    /// Payment was not completed in time.
    PaymentExpired {
        /// Order
        order: OrderKey,
    },

    /// A pending order was cancelled.
    OrderCancelled {
        /// Order
        order: OrderKey,
    },
}

/// Receives committed domain events.
#[automock]
pub trait EventSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: &DomainEvent);
}

/// Event sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: &DomainEvent) {}
}
