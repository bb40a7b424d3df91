//! Tier resolution: which subscription tier's benefits apply to a user.

use crate::models::{SubscriptionTier, UserSubscription, UserType};
use crate::services::store::BillingStore;
use marketplace_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierSource {
    /// Tier of an active or trialing subscription.
    Subscription,
    /// The user type's free tier row.
    FreeDefault,
    /// Built-in free tier; the tiers table had no free row.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveTier {
    pub tier: SubscriptionTier,
    pub user_type: UserType,
    pub source: TierSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<UserSubscription>,
}

/// `supplier` if any role is `supplier`, otherwise `buyer`.
pub fn user_type_from_roles(roles: &[String]) -> UserType {
    if roles.iter().any(|role| role == "supplier") {
        UserType::Supplier
    } else {
        UserType::Buyer
    }
}

#[instrument(skip(store))]
pub async fn resolve_effective_tier(
    store: &dyn BillingStore,
    user_id: Uuid,
) -> Result<EffectiveTier, AppError> {
    if let Some(subscription) = store.get_active_subscription(user_id).await? {
        match store.get_tier(subscription.tier_id).await? {
            Some(tier) => {
                let user_type = match tier.user_type() {
                    Some(user_type) => user_type,
                    None => user_type_from_roles(&store.get_user_roles(user_id).await?),
                };
                return Ok(EffectiveTier {
                    tier,
                    user_type,
                    source: TierSource::Subscription,
                    subscription: Some(subscription),
                });
            }
            None => warn!(
                subscription_id = %subscription.id,
                tier_id = %subscription.tier_id,
                "Active subscription references a missing tier"
            ),
        }
    }

    let user_type = user_type_from_roles(&store.get_user_roles(user_id).await?);

    match store.get_free_tier(user_type).await? {
        Some(tier) => Ok(EffectiveTier {
            tier,
            user_type,
            source: TierSource::FreeDefault,
            subscription: None,
        }),
        None => {
            warn!(user_type = %user_type, "No free tier configured, using built-in fallback");
            Ok(EffectiveTier {
                tier: SubscriptionTier::fallback_free(user_type),
                user_type,
                source: TierSource::Fallback,
                subscription: None,
            })
        }
    }
}

pub async fn list_tiers(
    store: &dyn BillingStore,
    user_type: Option<UserType>,
) -> Result<Vec<SubscriptionTier>, AppError> {
    store.list_tiers(user_type).await
}
