//! Transactions

use std::fmt;

use jiff::Timestamp;

use crate::{
    config::EngineConfig, events::DomainEvent, fees::FeeLedger, payments::PaymentGateway,
    store::Store,
};

/// A unit of work over a private copy of the store.
///
/// Nothing written through a transaction is visible outside it until
/// [`Engine::with_transaction`](crate::engine::Engine::with_transaction) commits it. Domain
/// events are buffered and only published on commit.
pub struct Transaction<'e> {
    store: Store,
    events: Vec<DomainEvent>,
    now: Timestamp,
    config: &'e EngineConfig,
    fees: &'e dyn FeeLedger,
    gateway: &'e dyn PaymentGateway,
}

impl<'e> Transaction<'e> {
    pub(crate) fn begin(
        store: Store,
        now: Timestamp,
        config: &'e EngineConfig,
        fees: &'e dyn FeeLedger,
        gateway: &'e dyn PaymentGateway,
    ) -> Self {
        Self {
            store,
            events: Vec::new(),
            now,
            config,
            fees,
            gateway,
        }
    }

    /// The instant this transaction started; every timestamp it writes uses it.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Read access to the transaction's view of the store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &'e EngineConfig {
        self.config
    }

    /// Fee accounting collaborator.
    pub fn fees(&self) -> &'e dyn FeeLedger {
        self.fees
    }

    /// Payment gateway collaborator.
    pub fn gateway(&self) -> &'e dyn PaymentGateway {
        self.gateway
    }

    /// Events that will be published if the transaction commits.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub(crate) fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub(crate) fn into_parts(self) -> (Store, Vec<DomainEvent>) {
        (self.store, self.events)
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("now", &self.now)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
