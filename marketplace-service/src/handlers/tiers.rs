use axum::{
    extract::{Query, State},
    Json,
};
use marketplace_core::error::AppError;

use crate::{
    dtos::TierQuery,
    middleware::AuthUser,
    models::SubscriptionTier,
    services::{self, EffectiveTier},
    AppState,
};

/// The tier whose benefits currently apply to the caller.
pub async fn get_my_tier(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<EffectiveTier>, AppError> {
    let effective = services::resolve_effective_tier(state.store.as_ref(), user.user_id()).await?;

    tracing::debug!(
        user_id = %user.user_id(),
        tier_key = %effective.tier.tier_key,
        source = ?effective.source,
        "Resolved effective tier"
    );

    Ok(Json(effective))
}

pub async fn list_tiers(
    State(state): State<AppState>,
    Query(query): Query<TierQuery>,
) -> Result<Json<Vec<SubscriptionTier>>, AppError> {
    let tiers = services::list_tiers(state.store.as_ref(), query.user_type).await?;
    Ok(Json(tiers))
}
