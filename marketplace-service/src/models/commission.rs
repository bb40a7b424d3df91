//! Commission rate brackets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// A row of `commission_rates`: the percentage retained for orders of a
/// given tier and side whose amount falls in `[order_min, order_max)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRate {
    pub id: Uuid,
    pub tier_name: String,
    pub user_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub order_min: Decimal,
    /// `None` means the bracket is unbounded above.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub order_max: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_rate: Decimal,
}

impl CommissionRate {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.order_min && self.order_max.map_or(true, |max| amount < max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    #[error("{tier_name}/{user_type}: bracket starting at {order_min} has order_max <= order_min")]
    Inverted {
        tier_name: String,
        user_type: String,
        order_min: Decimal,
    },
    #[error("{tier_name}/{user_type}: brackets overlap at {at}")]
    Overlap {
        tier_name: String,
        user_type: String,
        at: Decimal,
    },
    #[error("{tier_name}/{user_type}: gap between {from} and {to}")]
    Gap {
        tier_name: String,
        user_type: String,
        from: Decimal,
        to: Decimal,
    },
}

/// Check that, per `(tier_name, user_type)`, brackets are contiguous and
/// non-overlapping. Only the last bracket of a group may be unbounded.
pub fn validate_brackets(rates: &[CommissionRate]) -> Result<(), BracketError> {
    let mut groups: BTreeMap<(&str, &str), Vec<&CommissionRate>> = BTreeMap::new();
    for rate in rates {
        groups
            .entry((rate.tier_name.as_str(), rate.user_type.as_str()))
            .or_default()
            .push(rate);
    }

    for ((tier_name, user_type), mut brackets) in groups {
        brackets.sort_by(|a, b| a.order_min.cmp(&b.order_min));

        for bracket in &brackets {
            if matches!(bracket.order_max, Some(max) if max <= bracket.order_min) {
                return Err(BracketError::Inverted {
                    tier_name: tier_name.to_string(),
                    user_type: user_type.to_string(),
                    order_min: bracket.order_min,
                });
            }
        }

        for pair in brackets.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            match prev.order_max {
                None => {
                    return Err(BracketError::Overlap {
                        tier_name: tier_name.to_string(),
                        user_type: user_type.to_string(),
                        at: next.order_min,
                    })
                }
                Some(max) if max > next.order_min => {
                    return Err(BracketError::Overlap {
                        tier_name: tier_name.to_string(),
                        user_type: user_type.to_string(),
                        at: next.order_min,
                    })
                }
                Some(max) if max < next.order_min => {
                    return Err(BracketError::Gap {
                        tier_name: tier_name.to_string(),
                        user_type: user_type.to_string(),
                        from: max,
                        to: next.order_min,
                    })
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}
