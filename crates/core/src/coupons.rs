//! Coupons
//!
//! A coupon is a named discount percentage owned by a seller or their company. It discounts
//! the produce amount of cart lines whose listing belongs to that owner.

use decimal_percentage::Percentage;
use jiff::Timestamp;
use rust_decimal::Decimal;
use slotmap::new_key_type;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::{
    currency::fraction,
    errors::{EngineError, InvalidStateError, ValidationError},
    listings::MarketListing,
    orders::{LineItemKey, Order, OrderKey, OrderStatus, recompute_order, require_status},
    recompute::RecomputeOptions,
    store::{Store, Transaction},
    uuids::{CompanyUuid, UserUuid},
};

new_key_type! {
    /// Coupon Key
    pub struct CouponKey;
}

/// Who issued a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponOwner {
    /// An individual seller
    User(UserUuid),

    /// A company, covering every listing made on its behalf
    Company(CompanyUuid),
}

/// A discount code.
#[derive(Debug, Clone)]
pub struct Coupon {
    /// Normalised code
    pub code: String,

    /// Issuer
    pub owner: CouponOwner,

    /// Discount on the produce amount
    pub percentage: Percentage,

    /// When the coupon was created
    pub created_at: Timestamp,

    /// When the coupon was revoked; `None` while active
    pub revoked_at: Option<Timestamp>,
}

impl Coupon {
    /// Whether the coupon can still discount.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// Whether the coupon's owner is behind the listing.
    pub fn applies_to(&self, listing: &MarketListing) -> bool {
        match self.owner {
            CouponOwner::User(user) => listing.seller == user,
            CouponOwner::Company(company) => listing.company == Some(company),
        }
    }
}

/// A request to issue a coupon.
#[derive(Debug, Clone)]
pub struct NewCoupon {
    /// Code as typed by the issuer
    pub code: String,

    /// Issuer
    pub owner: CouponOwner,

    /// Discount, greater than 0% and at most 100%
    pub percentage: Percentage,
}

/// Codes are matched case-insensitively, ignoring surrounding whitespace.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Issue a coupon.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyCouponCode`], [`ValidationError::InvalidPercentage`], or
/// [`ConflictError::CouponCodeInUse`](crate::errors::ConflictError::CouponCodeInUse) if an
/// active coupon already has the code.
pub fn create_coupon(tx: &mut Transaction<'_>, new: NewCoupon) -> Result<CouponKey, EngineError> {
    let code = normalize_code(&new.code);

    if code.is_empty() {
        return Err(ValidationError::EmptyCouponCode.into());
    }

    let percent = fraction(new.percentage);

    if percent <= Decimal::ZERO || percent > Decimal::ONE {
        return Err(ValidationError::InvalidPercentage.into());
    }

    let now = tx.now();

    let key = tx.store_mut().insert_coupon(Coupon {
        code: code.clone(),
        owner: new.owner,
        percentage: new.percentage,
        created_at: now,
        revoked_at: None,
    })?;

    info!(coupon_key = ?key, %code, "created coupon");

    Ok(key)
}

/// Revoke the active coupon with `code`.
///
/// Carts keep the reference but stop receiving the discount on their next recompute.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownCoupon`] if no coupon has the code, or
/// [`InvalidStateError::CouponRevoked`] if it is already revoked.
pub fn revoke_coupon(tx: &mut Transaction<'_>, code: &str) -> Result<CouponKey, EngineError> {
    let key = find_active(tx.store(), code)?;
    let now = tx.now();

    tx.store_mut().coupon_mut(key)?.revoked_at = Some(now);

    info!(coupon_key = ?key, "revoked coupon");

    Ok(key)
}

/// Attach a coupon to every eligible line of a cart and reprice it.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`] unless the order is a cart,
/// [`ValidationError::UnknownCoupon`], [`InvalidStateError::CouponRevoked`], or
/// [`ValidationError::CouponNotApplicable`] if no line's listing belongs to the coupon owner.
pub fn apply_coupon(
    tx: &mut Transaction<'_>,
    order: OrderKey,
    code: &str,
) -> Result<Order, EngineError> {
    require_status(tx.store().order(order)?, OrderStatus::Cart)?;

    let key = find_active(tx.store(), code)?;
    let coupon = tx.store().coupon(key)?;

    let mut eligible: SmallVec<[LineItemKey; 8]> = SmallVec::new();

    for (item_key, item) in tx.store().line_items_for_order(order) {
        if coupon.applies_to(tx.store().listing(item.listing)?) {
            eligible.push(item_key);
        }
    }

    if eligible.is_empty() {
        return Err(ValidationError::CouponNotApplicable(coupon.code.clone()).into());
    }

    for item_key in &eligible {
        tx.store_mut().line_item_mut(*item_key)?.coupon = Some(key);
    }

    debug!(order_key = ?order, coupon_key = ?key, lines = eligible.len(), "applied coupon");

    recompute_order(tx, order, RecomputeOptions::PERSIST_CASCADE)
}

/// Detach a coupon from a cart's lines and reprice it.
///
/// Works for revoked coupons too, so a buyer can always clear a code they entered.
///
/// # Errors
///
/// Returns [`InvalidStateError::UnexpectedStatus`] unless the order is a cart, or
/// [`ValidationError::UnknownCoupon`].
pub fn clear_coupon(
    tx: &mut Transaction<'_>,
    order: OrderKey,
    code: &str,
) -> Result<Order, EngineError> {
    require_status(tx.store().order(order)?, OrderStatus::Cart)?;

    let code = normalize_code(code);

    let (key, _) = tx
        .store()
        .coupon_by_code(&code)
        .ok_or_else(|| ValidationError::UnknownCoupon(code.clone()))?;

    let attached: SmallVec<[LineItemKey; 8]> = tx
        .store()
        .line_items_for_order(order)
        .filter(|(_, item)| item.coupon == Some(key))
        .map(|(item_key, _)| item_key)
        .collect();

    for item_key in &attached {
        tx.store_mut().line_item_mut(*item_key)?.coupon = None;
    }

    debug!(order_key = ?order, coupon_key = ?key, lines = attached.len(), "cleared coupon");

    recompute_order(tx, order, RecomputeOptions::PERSIST_CASCADE)
}

fn find_active(store: &Store, code: &str) -> Result<CouponKey, EngineError> {
    let code = normalize_code(code);

    let (key, coupon) = store
        .coupon_by_code(&code)
        .ok_or_else(|| ValidationError::UnknownCoupon(code.clone()))?;

    if !coupon.is_active() {
        return Err(InvalidStateError::CouponRevoked(code).into());
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::KES;

    use crate::crates::CrateKey;

    use super::*;

    fn listing(seller: UserUuid, company: Option<CompanyUuid>) -> MarketListing {
        MarketListing {
            krate: CrateKey::default(),
            seller,
            company,
            currency: KES,
            prices: SmallVec::new(),
            pending_fee_per_kg: Decimal::ZERO,
            pending_fees: Decimal::ZERO,
            locked_weight: Decimal::ZERO,
            available_weight: Decimal::ZERO,
            created_at: Timestamp::UNIX_EPOCH,
            delisted_at: None,
            computed_at: None,
        }
    }

    fn coupon(owner: CouponOwner) -> Coupon {
        Coupon {
            code: "HARVEST10".to_string(),
            owner,
            percentage: Percentage::from(0.1),
            created_at: Timestamp::UNIX_EPOCH,
            revoked_at: None,
        }
    }

    #[test]
    fn codes_are_trimmed_and_uppercased() {
        assert_eq!(normalize_code("  harvest10 "), "HARVEST10");
    }

    #[test]
    fn user_coupons_apply_to_their_own_listings() {
        let seller = UserUuid::new();
        let coupon = coupon(CouponOwner::User(seller));

        assert!(coupon.applies_to(&listing(seller, None)));
        assert!(!coupon.applies_to(&listing(UserUuid::new(), None)));
    }

    #[test]
    fn company_coupons_apply_to_listings_made_for_the_company() {
        let company = CompanyUuid::new();
        let coupon = coupon(CouponOwner::Company(company));

        assert!(coupon.applies_to(&listing(UserUuid::new(), Some(company))));
        assert!(!coupon.applies_to(&listing(UserUuid::new(), None)));
        assert!(!coupon.applies_to(&listing(UserUuid::new(), Some(CompanyUuid::new()))));
    }

    #[test]
    fn revoked_coupons_are_inactive() {
        let mut coupon = coupon(CouponOwner::User(UserUuid::new()));

        assert!(coupon.is_active());

        coupon.revoked_at = Some(Timestamp::UNIX_EPOCH);

        assert!(!coupon.is_active());
    }
}
