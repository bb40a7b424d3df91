//! Fee calculator.
//!
//! Splits an order amount into the supplier commission, the buyer service
//! fee and the card processing fee. Each monetary component is rounded to
//! cents first; totals are derived from the rounded components so that
//!
//! * `total_paid_by_buyer = order_amount + buyer_service_fee_amount`
//! * `net_to_supplier = order_amount - supplier_commission_amount - stripe_processing_fee`
//! * `platform_revenue = supplier_commission_amount + buyer_service_fee_amount - stripe_processing_fee`
//!
//! hold exactly.

use crate::models::UserType;
use crate::services::metrics::record_fee_calculation;
use crate::services::store::BillingStore;
use marketplace_core::error::AppError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Supplier commission percentage when no bracket matches.
pub const DEFAULT_SUPPLIER_COMMISSION_PERCENT: Decimal = Decimal::from_parts(50, 0, 0, false, 1);

/// Buyer service fee percentage when the buyer tier is unknown.
pub const DEFAULT_BUYER_FEE_PERCENT: Decimal = Decimal::from_parts(35, 0, 0, false, 1);

/// Card processing: 2.9% of the order amount.
pub const STRIPE_PERCENT_FEE: Decimal = Decimal::from_parts(29, 0, 0, false, 3);

/// Card processing: fixed 0.30 per charge.
pub const STRIPE_FIXED_FEE: Decimal = Decimal::from_parts(30, 0, 0, false, 2);

/// Largest order amount accepted: 10^12.
pub const MAX_ORDER_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Where an applied rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Table,
    Default,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSource::Table => "table",
            RateSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCalculation {
    #[serde(with = "rust_decimal::serde::float")]
    pub order_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub supplier_commission_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub supplier_commission_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub buyer_service_fee_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub buyer_service_fee_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stripe_processing_fee: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_to_supplier: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_paid_by_buyer: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub platform_revenue: Decimal,
    pub supplier_rate_source: RateSource,
    pub buyer_rate_source: RateSource,
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl FeeCalculation {
    /// Pure arithmetic over already-resolved rates (percentages).
    ///
    /// `None` when an intermediate value overflows `Decimal`.
    pub fn compute(
        order_amount: Decimal,
        supplier_rate: Decimal,
        supplier_rate_source: RateSource,
        buyer_rate: Decimal,
        buyer_rate_source: RateSource,
    ) -> Option<Self> {
        let percent_of = |rate: Decimal| {
            order_amount
                .checked_mul(rate)?
                .checked_div(Decimal::ONE_HUNDRED)
                .map(to_cents)
        };

        let supplier_commission_amount = percent_of(supplier_rate)?;
        let buyer_service_fee_amount = percent_of(buyer_rate)?;
        let stripe_processing_fee = to_cents(
            order_amount
                .checked_mul(STRIPE_PERCENT_FEE)?
                .checked_add(STRIPE_FIXED_FEE)?,
        );

        Some(Self {
            order_amount,
            supplier_commission_rate: supplier_rate,
            supplier_commission_amount,
            buyer_service_fee_rate: buyer_rate,
            buyer_service_fee_amount,
            stripe_processing_fee,
            net_to_supplier: order_amount
                .checked_sub(supplier_commission_amount)?
                .checked_sub(stripe_processing_fee)?,
            total_paid_by_buyer: order_amount.checked_add(buyer_service_fee_amount)?,
            platform_revenue: supplier_commission_amount
                .checked_add(buyer_service_fee_amount)?
                .checked_sub(stripe_processing_fee)?,
            supplier_rate_source,
            buyer_rate_source,
        })
    }
}

/// Resolve both rates from the store and compute the breakdown.
///
/// A missing bracket or tier falls back to the default rate; the fallback
/// is logged, counted and reported in the `*_rate_source` fields.
#[instrument(skip(store), fields(order_amount = %order_amount))]
pub async fn calculate_fees(
    store: &dyn BillingStore,
    order_amount: Decimal,
    supplier_tier: &str,
    buyer_tier: &str,
) -> Result<FeeCalculation, AppError> {
    if order_amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!("orderAmount must be greater than zero")));
    }
    if order_amount > MAX_ORDER_AMOUNT {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "orderAmount must not exceed {}",
            MAX_ORDER_AMOUNT
        )));
    }

    let (supplier_rate, supplier_rate_source) = match store
        .find_commission_rate(supplier_tier, UserType::Supplier, order_amount)
        .await?
    {
        Some(rate) => (rate.base_rate, RateSource::Table),
        None => {
            warn!(
                supplier_tier = %supplier_tier,
                default_rate = %DEFAULT_SUPPLIER_COMMISSION_PERCENT,
                "No commission bracket matched, using default supplier rate"
            );
            (DEFAULT_SUPPLIER_COMMISSION_PERCENT, RateSource::Default)
        }
    };

    let buyer_row = store
        .get_tier_by_key(buyer_tier)
        .await?
        .filter(|tier| tier.user_type() == Some(UserType::Buyer));

    let (buyer_rate, buyer_rate_source) = match buyer_row {
        Some(tier) => (tier.transaction_fee_percent, RateSource::Table),
        None => {
            warn!(
                buyer_tier = %buyer_tier,
                default_rate = %DEFAULT_BUYER_FEE_PERCENT,
                "No buyer tier with this key, using default buyer fee"
            );
            (DEFAULT_BUYER_FEE_PERCENT, RateSource::Default)
        }
    };

    record_fee_calculation(supplier_rate_source.as_str(), buyer_rate_source.as_str());

    FeeCalculation::compute(
        order_amount,
        supplier_rate,
        supplier_rate_source,
        buyer_rate,
        buyer_rate_source,
    )
    .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("orderAmount is too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommissionRate, SubscriptionTier};
    use crate::testing::InMemoryStore;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn defaults(amount: Decimal) -> FeeCalculation {
        FeeCalculation::compute(
            amount,
            DEFAULT_SUPPLIER_COMMISSION_PERCENT,
            RateSource::Default,
            DEFAULT_BUYER_FEE_PERCENT,
            RateSource::Default,
        )
        .unwrap()
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_SUPPLIER_COMMISSION_PERCENT, dec("5.0"));
        assert_eq!(DEFAULT_BUYER_FEE_PERCENT, dec("3.5"));
        assert_eq!(STRIPE_PERCENT_FEE, dec("0.029"));
        assert_eq!(STRIPE_FIXED_FEE, dec("0.30"));
        assert_eq!(MAX_ORDER_AMOUNT, dec("1000000000000"));
    }

    #[test]
    fn test_thousand_with_defaults() {
        let fees = defaults(dec("1000"));
        assert_eq!(fees.supplier_commission_amount, dec("50"));
        assert_eq!(fees.buyer_service_fee_amount, dec("35"));
        assert_eq!(fees.stripe_processing_fee, dec("29.30"));
        assert_eq!(fees.total_paid_by_buyer, dec("1035"));
        assert_eq!(fees.net_to_supplier, dec("920.70"));
        assert_eq!(fees.platform_revenue, dec("55.70"));
    }

    #[test]
    fn test_identities_hold_for_awkward_amounts() {
        for amount in ["0.01", "0.10", "1.99", "12.345", "333.33", "999.995", "123456.78"] {
            let fees = defaults(dec(amount));
            assert_eq!(
                fees.total_paid_by_buyer,
                fees.order_amount + fees.buyer_service_fee_amount
            );
            assert_eq!(
                fees.net_to_supplier,
                fees.order_amount - fees.supplier_commission_amount - fees.stripe_processing_fee
            );
            assert_eq!(
                fees.platform_revenue,
                fees.supplier_commission_amount + fees.buyer_service_fee_amount
                    - fees.stripe_processing_fee
            );
        }
    }

    #[test]
    fn test_half_cent_rounds_away_from_zero() {
        // 0.10 * 5% = 0.005
        let fees = defaults(dec("0.10"));
        assert_eq!(fees.supplier_commission_amount, dec("0.01"));
        // 0.01 * 2.9% + 0.30 = 0.30029
        assert_eq!(defaults(dec("0.01")).stripe_processing_fee, dec("0.30"));
    }

    #[test]
    fn test_serializes_camel_case_numbers() {
        let json = serde_json::to_value(defaults(dec("1000"))).unwrap();
        assert_eq!(json["netToSupplier"], serde_json::json!(920.7));
        assert_eq!(json["totalPaidByBuyer"], serde_json::json!(1035.0));
        assert_eq!(json["supplierRateSource"], "default");
    }

    fn supplier_bracket(min: i64, max: Option<i64>, rate: &str) -> CommissionRate {
        CommissionRate {
            id: Uuid::new_v4(),
            tier_name: "supplier_growth".to_string(),
            user_type: "supplier".to_string(),
            order_min: Decimal::from(min),
            order_max: max.map(Decimal::from),
            base_rate: dec(rate),
        }
    }

    fn buyer_tier(key: &str, fee: &str) -> SubscriptionTier {
        let mut tier = SubscriptionTier::fallback_free(UserType::Buyer);
        tier.id = Uuid::new_v4();
        tier.tier_key = key.to_string();
        tier.is_free = false;
        tier.transaction_fee_percent = dec(fee);
        tier
    }

    #[tokio::test]
    async fn test_rates_come_from_tables() {
        let store = InMemoryStore::new()
            .with_commission_rate(supplier_bracket(0, Some(1000), "4.5"))
            .with_commission_rate(supplier_bracket(1000, None, "3.0"))
            .with_tier(buyer_tier("buyer_pro", "2.0"));

        let fees = calculate_fees(&store, dec("1000"), "supplier_growth", "buyer_pro")
            .await
            .unwrap();

        // 1000 falls in the upper bracket: order_max is exclusive.
        assert_eq!(fees.supplier_commission_rate, dec("3.0"));
        assert_eq!(fees.supplier_commission_amount, dec("30"));
        assert_eq!(fees.buyer_service_fee_rate, dec("2.0"));
        assert_eq!(fees.supplier_rate_source, RateSource::Table);
        assert_eq!(fees.buyer_rate_source, RateSource::Table);

        let fees = calculate_fees(&store, dec("999.99"), "supplier_growth", "buyer_pro")
            .await
            .unwrap();
        assert_eq!(fees.supplier_commission_rate, dec("4.5"));
    }

    #[tokio::test]
    async fn test_missing_rows_fall_back_to_defaults() {
        let store = InMemoryStore::new();

        let fees = calculate_fees(&store, dec("1000"), "unknown", "unknown")
            .await
            .unwrap();

        assert_eq!(fees, defaults(dec("1000")));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let store = InMemoryStore::new();

        for amount in ["0", "-5"] {
            let result = calculate_fees(&store, dec(amount), "supplier_free", "buyer_free").await;
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_rejects_amounts_beyond_limit() {
        let store = InMemoryStore::new();

        let at_limit = calculate_fees(&store, MAX_ORDER_AMOUNT, "supplier_free", "buyer_free")
            .await
            .unwrap();
        assert_eq!(at_limit.supplier_commission_amount, dec("50000000000"));

        for amount in ["1000000000000.01", "79228162514264337593543950335"] {
            let result = calculate_fees(&store, dec(amount), "supplier_free", "buyer_free").await;
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn test_compute_reports_overflow() {
        let result = FeeCalculation::compute(
            Decimal::MAX,
            DEFAULT_SUPPLIER_COMMISSION_PERCENT,
            RateSource::Default,
            DEFAULT_BUYER_FEE_PERCENT,
            RateSource::Default,
        );
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_supplier_tier_is_not_a_buyer_rate() {
        let mut supplier_pro = SubscriptionTier::fallback_free(UserType::Supplier);
        supplier_pro.id = Uuid::new_v4();
        supplier_pro.tier_key = "supplier_pro".to_string();
        supplier_pro.is_free = false;
        supplier_pro.transaction_fee_percent = dec("9.0");
        let store = InMemoryStore::new().with_tier(supplier_pro);

        let fees = calculate_fees(&store, dec("1000"), "supplier_free", "supplier_pro")
            .await
            .unwrap();

        assert_eq!(fees.buyer_service_fee_rate, DEFAULT_BUYER_FEE_PERCENT);
        assert_eq!(fees.buyer_rate_source, RateSource::Default);
    }
}
