//! Currency helpers
//!
//! Amounts are carried as [`Decimal`] and only rounded at the points where a total is
//! produced. Rounding is half-up to the currency's minor unit.

use decimal_percentage::Percentage;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use rusty_money::{
    Money,
    iso::{self, Currency},
};

use crate::errors::ValidationError;

/// Resolve an ISO 4217 alphabetic code (e.g. `"KES"`).
///
/// # Errors
///
/// Returns [`ValidationError::UnknownCurrency`] if the code is not recognised.
pub fn parse_currency(code: &str) -> Result<&'static Currency, ValidationError> {
    let code = code.trim();

    iso::find(&code.to_ascii_uppercase())
        .ok_or_else(|| ValidationError::UnknownCurrency(code.to_string()))
}

/// Check that a record's currency matches the one it is valued against.
///
/// # Errors
///
/// Returns [`ValidationError::CurrencyMismatch`] if the ISO codes differ.
pub fn ensure_currency(expected: &Currency, actual: &Currency) -> Result<(), ValidationError> {
    if expected.iso_alpha_code != actual.iso_alpha_code {
        return Err(ValidationError::CurrencyMismatch {
            expected: expected.iso_alpha_code,
            actual: actual.iso_alpha_code,
        });
    }

    Ok(())
}

/// Round an amount half-up to the currency's minor unit.
pub fn round_amount(amount: Decimal, currency: &Currency) -> Decimal {
    amount.round_dp_with_strategy(currency.exponent, RoundingStrategy::MidpointAwayFromZero)
}

/// Clamp an amount so it never drops below zero.
pub fn floor_zero(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO)
}

/// The decimal fraction a percentage represents (`25%` is `0.25`).
pub fn fraction(percent: Percentage) -> Decimal {
    // decimal_percentage doesn't expose the underlying Decimal
    percent * Decimal::ONE
}

/// Apply a percentage to an amount, rounding the result to the currency.
pub fn percent_of(percent: Percentage, amount: Decimal, currency: &Currency) -> Decimal {
    round_amount(fraction(percent) * amount, currency)
}

/// Convert a decimal amount into [`Money`] via its minor units.
///
/// # Errors
///
/// Returns [`ValidationError::UnrepresentableAmount`] if the amount does not fit in `i64`
/// minor units.
pub fn to_money(
    amount: Decimal,
    currency: &'static Currency,
) -> Result<Money<'static, Currency>, ValidationError> {
    let mut minor = round_amount(amount, currency);
    minor.rescale(currency.exponent);

    let minor_units = minor
        .mantissa()
        .to_i64()
        .ok_or(ValidationError::UnrepresentableAmount(amount))?;

    Ok(Money::from_minor(minor_units, currency))
}
