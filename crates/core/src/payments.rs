//! Payment gateway
//!
//! Checkout-session creation and processor fees belong to the payment provider. Failures are
//! surfaced to the caller and never retried here.

use decimal_percentage::Percentage;
use mockall::automock;
use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use slotmap::Key;
use thiserror::Error;

use crate::{currency::percent_of, orders::OrderKey};

/// Errors reported by a payment gateway.
#[derive(Debug, Error, PartialEq)]
pub enum GatewayError {
    /// The gateway refused the request.
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),

    /// The gateway could not be reached.
    #[error("payment gateway unavailable")]
    Unavailable,
}

/// Amount due once the processor fee is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayQuote {
    /// Amount the buyer pays
    pub final_amount: Decimal,

    /// Fee kept by the payment processor
    pub processor_fee: Decimal,
}

/// Payment provider consumed by the engine.
#[automock]
pub trait PaymentGateway: Send + Sync {
    /// Compute the amount due and the processor fee for a subtotal.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider fails.
    fn compute_final_amount_and_processor_fee(
        &self,
        subtotal: Decimal,
        currency: &'static Currency,
    ) -> Result<GatewayQuote, GatewayError>;

    /// Register a pending payment for the order.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider fails.
    fn set_pending_payment(
        &self,
        order: OrderKey,
        amount: Decimal,
        currency: &'static Currency,
    ) -> Result<(), GatewayError>;

    /// URL the buyer completes payment at.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider fails.
    fn checkout_url(&self, order: OrderKey) -> Result<String, GatewayError>;
}

/// Gateway charging a flat percentage of the subtotal as its processor fee.
#[derive(Debug, Clone)]
pub struct PercentageFeeGateway {
    rate: Percentage,
    checkout_base_url: String,
}

impl PercentageFeeGateway {
    /// Create a gateway charging `rate` and serving checkouts under `checkout_base_url`.
    pub fn new(rate: Percentage, checkout_base_url: impl Into<String>) -> Self {
        Self {
            rate,
            checkout_base_url: checkout_base_url.into(),
        }
    }
}

impl PaymentGateway for PercentageFeeGateway {
    fn compute_final_amount_and_processor_fee(
        &self,
        subtotal: Decimal,
        currency: &'static Currency,
    ) -> Result<GatewayQuote, GatewayError> {
        let processor_fee = percent_of(self.rate, subtotal, currency);

        Ok(GatewayQuote {
            final_amount: subtotal + processor_fee,
            processor_fee,
        })
    }

    fn set_pending_payment(
        &self,
        _order: OrderKey,
        _amount: Decimal,
        _currency: &'static Currency,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    fn checkout_url(&self, order: OrderKey) -> Result<String, GatewayError> {
        Ok(format!(
            "{}/{}",
            self.checkout_base_url.trim_end_matches('/'),
            order.data().as_ffi()
        ))
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::KES;
    use testresult::TestResult;

    use super::*;

    #[test]
    fn percentage_gateway_adds_processor_fee() -> TestResult {
        let gateway = PercentageFeeGateway::new(Percentage::from(0.035), "https://pay.test");

        let quote = gateway.compute_final_amount_and_processor_fee(Decimal::new(10_000, 2), KES)?;

        assert_eq!(quote.processor_fee, Decimal::new(350, 2));
        assert_eq!(quote.final_amount, Decimal::new(10_350, 2));

        Ok(())
    }

    #[test]
    fn checkout_url_is_scoped_under_base() -> TestResult {
        let gateway = PercentageFeeGateway::new(Percentage::from(0.035), "https://pay.test/");

        let url = gateway.checkout_url(OrderKey::default())?;

        assert!(url.starts_with("https://pay.test/"), "unexpected url {url}");

        Ok(())
    }
}
