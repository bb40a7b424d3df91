//! Subscription tier model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which side of the marketplace a user (and a tier) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Buyer,
    Supplier,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Buyer => "buyer",
            UserType::Supplier => "supplier",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "buyer" => Some(UserType::Buyer),
            "supplier" => Some(UserType::Supplier),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of `subscription_tiers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTier {
    pub id: Uuid,
    pub tier_key: String,
    pub name: String,
    pub user_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_monthly: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub price_yearly: Decimal,
    /// Percentage, e.g. `3.5` for 3.5%.
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_fee_percent: Decimal,
    pub trial_days: i32,
    pub is_free: bool,
}

impl SubscriptionTier {
    pub fn user_type(&self) -> Option<UserType> {
        UserType::from_string(&self.user_type)
    }

    /// Built-in free tier used when the tiers table has no free row for
    /// `user_type`. Fee rates match the fee calculator defaults.
    pub fn fallback_free(user_type: UserType) -> Self {
        let (tier_key, name, fee) = match user_type {
            UserType::Buyer => ("buyer_free", "Buyer Free", Decimal::new(35, 1)),
            UserType::Supplier => ("supplier_free", "Supplier Free", Decimal::new(50, 1)),
        };

        Self {
            id: Uuid::nil(),
            tier_key: tier_key.to_string(),
            name: name.to_string(),
            user_type: user_type.as_str().to_string(),
            price_monthly: Decimal::ZERO,
            price_yearly: Decimal::ZERO,
            transaction_fee_percent: fee,
            trial_days: 0,
            is_free: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_tiers_are_free_and_typed() {
        let supplier = SubscriptionTier::fallback_free(UserType::Supplier);
        assert_eq!(supplier.tier_key, "supplier_free");
        assert_eq!(supplier.user_type(), Some(UserType::Supplier));
        assert!(supplier.is_free);
        assert_eq!(supplier.transaction_fee_percent, Decimal::new(5, 0));

        let buyer = SubscriptionTier::fallback_free(UserType::Buyer);
        assert_eq!(buyer.transaction_fee_percent, Decimal::new(35, 1));
        assert_eq!(buyer.price_monthly, Decimal::ZERO);
    }

    #[test]
    fn user_type_round_trips_through_strings() {
        assert_eq!(UserType::from_string("supplier"), Some(UserType::Supplier));
        assert_eq!(UserType::from_string("admin"), None);
        assert_eq!(UserType::Buyer.to_string(), "buyer");
    }
}
