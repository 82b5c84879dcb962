//! Integration tests for cart pricing: line amounts, coupons and the fee layers on top.

use decimal_percentage::Percentage;
use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::KES};
use testresult::TestResult;

use coldroom::{
    config::EngineConfig,
    coupons::{CouponOwner, NewCoupon},
    engine::Engine,
    errors::{EngineError, EntityKind, FailureReason, InvalidStateError, ValidationError},
    fees::{CoolingFeePolicy, PolicyFeeLedger},
    listings::{ListingKey, NewListing},
    movements::NewProduce,
    orders::{CartEdit, OrderTotals},
    payments::{GatewayError, GatewayQuote, MockPaymentGateway, PaymentGateway, PercentageFeeGateway},
    recompute::RecomputeOptions,
    storage_units::{StorageUnit, StorageUnitKey},
    uuids::UserUuid,
};

fn kg(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

fn amount(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

fn engine_with(gateway: impl PaymentGateway + 'static) -> Engine {
    Engine::new(EngineConfig::default(), PolicyFeeLedger, gateway)
        .with_clock(|| Timestamp::UNIX_EPOCH)
}

fn engine() -> Engine {
    engine_with(PercentageFeeGateway::new(
        Percentage::from(0.0),
        "https://pay.test",
    ))
}

/// Check in one crate and list it.
fn listed_crate(
    engine: &mut Engine,
    unit: StorageUnitKey,
    seller: UserUuid,
    weight: Decimal,
    fee_per_kg: Decimal,
    price_per_kg: Decimal,
) -> Result<ListingKey, EngineError> {
    let (_, crates) = engine.check_in(NewProduce {
        crop: "Avocados".to_string(),
        owner: seller,
        storage_unit: unit,
        currency: KES,
        cooling_policy: CoolingFeePolicy::Fixed { per_kg: fee_per_kg },
        crate_weights: [weight].into_iter().collect(),
    })?;

    let krate = crates
        .first()
        .copied()
        .ok_or(EngineError::NotFound(EntityKind::Crate))?;

    engine.create_listing(NewListing {
        krate,
        seller,
        company: None,
        currency: KES,
        price_per_kg,
    })
}

#[test]
fn order_totals_layer_platform_and_processor_fees() -> TestResult {
    let mut gateway = MockPaymentGateway::new();

    gateway
        .expect_compute_final_amount_and_processor_fee()
        .returning(|subtotal, _| {
            if subtotal == amount(3_060) {
                Ok(GatewayQuote {
                    final_amount: amount(3_150),
                    processor_fee: amount(90),
                })
            } else {
                Ok(GatewayQuote {
                    final_amount: subtotal,
                    processor_fee: Decimal::ZERO,
                })
            }
        });

    let mut engine = engine_with(gateway);
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let seller = UserUuid::new();

    let first = listed_crate(&mut engine, unit, seller, kg(10), Decimal::ZERO, Decimal::ONE)?;
    let second = listed_crate(&mut engine, unit, seller, kg(20), Decimal::ZERO, Decimal::ONE)?;

    let order = engine.create_cart(UserUuid::new(), KES)?;

    engine.edit_cart(order, CartEdit::replace(first, kg(10)))?;
    let totals = engine.edit_cart(order, CartEdit::replace(second, kg(20)))?.totals;

    assert_eq!(
        totals,
        OrderTotals {
            produce: amount(3_000),
            cooling_fees: Decimal::ZERO,
            discount: Decimal::ZERO,
            platform_fee: amount(60),
            payment_fees: amount(90),
            total: amount(3_150),
        }
    );
    assert_eq!(
        engine.store().order(order)?.total_money()?,
        Money::from_minor(3_150, KES)
    );

    Ok(())
}

#[test]
fn recomputing_twice_yields_identical_totals() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let seller = UserUuid::new();
    let listing = listed_crate(
        &mut engine,
        unit,
        seller,
        kg(12),
        Decimal::new(35, 2),
        Decimal::new(333, 2),
    )?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    engine.edit_cart(order, CartEdit::replace(listing, Decimal::new(75, 1)))?;

    let first = engine.recompute(order, RecomputeOptions::PERSIST_CASCADE)?;
    let second = engine.recompute(order, RecomputeOptions::PERSIST_CASCADE)?;

    assert_eq!(first.totals, second.totals);
    assert_eq!(engine.store().order(order)?.totals, second.totals);

    Ok(())
}

#[test]
fn cooling_fees_are_carried_into_the_line() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let listing = listed_crate(
        &mut engine,
        unit,
        UserUuid::new(),
        kg(10),
        Decimal::new(5, 1),
        kg(2),
    )?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    let totals = engine.edit_cart(order, CartEdit::replace(listing, kg(4)))?.totals;

    assert_eq!(totals.produce, amount(800));
    assert_eq!(totals.cooling_fees, amount(200));
    assert_eq!(totals.platform_fee, amount(20));
    assert_eq!(totals.total, amount(1_020));

    let (_, item) = engine
        .store()
        .line_items_for_order(order)
        .next()
        .ok_or("missing line item")?;

    assert_eq!(item.frozen_price_per_kg, kg(2));
    assert_eq!(item.frozen_available_weight, kg(10));
    assert_eq!(item.pricing.total_amount, amount(1_000));

    Ok(())
}

#[test]
fn coupon_round_trip_restores_line_total() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let seller = UserUuid::new();
    let listing = listed_crate(&mut engine, unit, seller, kg(10), Decimal::ZERO, kg(5))?;

    engine.create_coupon(NewCoupon {
        code: " harvest10 ".to_string(),
        owner: CouponOwner::User(seller),
        percentage: Percentage::from(0.1),
    })?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    engine.edit_cart(order, CartEdit::replace(listing, kg(10)))?;

    let line_total = |engine: &Engine| -> Result<Decimal, &'static str> {
        engine
            .store()
            .line_items_for_order(order)
            .next()
            .map(|(_, item)| item.pricing.total_amount)
            .ok_or("missing line item")
    };

    assert_eq!(line_total(&engine)?, amount(5_000));

    let totals = engine.apply_coupon(order, "HARVEST10")?.totals;

    assert_eq!(totals.discount, amount(500));
    assert_eq!(line_total(&engine)?, amount(4_500));

    let totals = engine.clear_coupon(order, "harvest10")?.totals;

    assert_eq!(totals.discount, Decimal::ZERO);
    assert_eq!(line_total(&engine)?, amount(5_000));

    Ok(())
}

#[test]
fn coupons_only_apply_to_their_owners_listings() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let listing = listed_crate(&mut engine, unit, UserUuid::new(), kg(10), Decimal::ZERO, kg(5))?;

    engine.create_coupon(NewCoupon {
        code: "OTHER".to_string(),
        owner: CouponOwner::User(UserUuid::new()),
        percentage: Percentage::from(0.2),
    })?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    engine.edit_cart(order, CartEdit::replace(listing, kg(10)))?;

    let result = engine.apply_coupon(order, "OTHER");

    assert!(
        matches!(
            result,
            Err(EngineError::Validation(ValidationError::CouponNotApplicable(ref code))) if code == "OTHER"
        ),
        "expected CouponNotApplicable, got {result:?}"
    );

    let result = engine.apply_coupon(order, "MISSING");

    assert!(
        matches!(
            result,
            Err(EngineError::Validation(ValidationError::UnknownCoupon(_)))
        ),
        "expected UnknownCoupon, got {result:?}"
    );

    Ok(())
}

#[test]
fn revoked_coupons_stop_discounting() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let seller = UserUuid::new();
    let listing = listed_crate(&mut engine, unit, seller, kg(10), Decimal::ZERO, kg(5))?;

    engine.create_coupon(NewCoupon {
        code: "HARVEST10".to_string(),
        owner: CouponOwner::User(seller),
        percentage: Percentage::from(0.1),
    })?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    engine.edit_cart(order, CartEdit::replace(listing, kg(10)))?;
    engine.apply_coupon(order, "HARVEST10")?;

    engine.revoke_coupon("HARVEST10")?;

    let order_totals = engine.recompute(order, RecomputeOptions::PERSIST_CASCADE)?.totals;

    assert_eq!(order_totals.discount, Decimal::ZERO);

    let result = engine.apply_coupon(order, "HARVEST10");

    assert!(
        matches!(
            result,
            Err(EngineError::InvalidState(InvalidStateError::CouponRevoked(_)))
        ),
        "expected CouponRevoked, got {result:?}"
    );

    // The code is free again once revoked.
    engine.create_coupon(NewCoupon {
        code: "HARVEST10".to_string(),
        owner: CouponOwner::User(seller),
        percentage: Percentage::from(0.15),
    })?;

    let totals = engine.apply_coupon(order, "HARVEST10")?.totals;

    assert_eq!(totals.discount, amount(750));

    Ok(())
}

#[test]
fn coupon_codes_and_percentages_are_validated() -> TestResult {
    let mut engine = engine();
    let owner = CouponOwner::User(UserUuid::new());

    let result = engine.create_coupon(NewCoupon {
        code: "   ".to_string(),
        owner,
        percentage: Percentage::from(0.1),
    });

    assert!(
        matches!(
            result,
            Err(EngineError::Validation(ValidationError::EmptyCouponCode))
        ),
        "expected EmptyCouponCode, got {result:?}"
    );

    let result = engine.create_coupon(NewCoupon {
        code: "TOOMUCH".to_string(),
        owner,
        percentage: Percentage::from(1.5),
    });

    assert!(
        matches!(
            result,
            Err(EngineError::Validation(ValidationError::InvalidPercentage))
        ),
        "expected InvalidPercentage, got {result:?}"
    );

    engine.create_coupon(NewCoupon {
        code: "TAKEN".to_string(),
        owner,
        percentage: Percentage::from(0.1),
    })?;

    let result = engine.create_coupon(NewCoupon {
        code: "taken".to_string(),
        owner,
        percentage: Percentage::from(0.1),
    });

    assert_eq!(
        result.err().map(|error| error.reason()),
        Some(FailureReason::Conflict)
    );

    Ok(())
}

#[test]
fn repricing_reaches_carts_on_next_recompute() -> TestResult {
    let mut engine = engine();
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let seller = UserUuid::new();
    let listing = listed_crate(&mut engine, unit, seller, kg(10), Decimal::ZERO, kg(2))?;

    let order = engine.create_cart(UserUuid::new(), KES)?;
    engine.edit_cart(order, CartEdit::replace(listing, kg(5)))?;

    engine.change_listing_price(listing, kg(3), seller)?;

    assert_eq!(engine.store().order(order)?.totals.produce, amount(1_000));

    let totals = engine.recompute(order, RecomputeOptions::PERSIST_CASCADE)?.totals;

    assert_eq!(totals.produce, amount(1_500));
    assert_eq!(engine.store().current_price(listing)?.price_per_kg, kg(3));
    assert_eq!(engine.store().listing(listing)?.prices.len(), 2);

    Ok(())
}

#[test]
fn gateway_failure_rolls_back_the_edit() -> TestResult {
    let mut gateway = MockPaymentGateway::new();

    gateway
        .expect_compute_final_amount_and_processor_fee()
        .returning(|_, _| Err(GatewayError::Unavailable));

    let mut engine = engine_with(gateway);
    let unit = engine.add_storage_unit(StorageUnit::counted("Room A", 10))?;
    let listing = listed_crate(&mut engine, unit, UserUuid::new(), kg(10), Decimal::ZERO, kg(2))?;

    // Empty carts never reach the gateway.
    let order = engine.create_cart(UserUuid::new(), KES)?;

    let result = engine.edit_cart(order, CartEdit::replace(listing, kg(5)));

    let Err(error) = result else {
        return Err("edit succeeded despite gateway failure".into());
    };

    assert!(
        matches!(error, EngineError::PaymentGateway(GatewayError::Unavailable)),
        "expected gateway error, got {error:?}"
    );
    assert_eq!(error.reason(), FailureReason::Upstream);
    assert_eq!(engine.store().line_items_for_order(order).count(), 0);
    assert_eq!(engine.store().pickups_for_order(order).count(), 0);

    Ok(())
}
