use axum::{extract::State, Json};
use marketplace_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::CalculateFeesRequest,
    middleware::AuthUser,
    services::{self, FeeCalculation},
    AppState,
};

/// Break an order amount down into commissions, fees and payouts.
pub async fn calculate_fees(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CalculateFeesRequest>,
) -> Result<Json<FeeCalculation>, AppError> {
    payload.validate()?;

    tracing::info!(
        user_id = %user.user_id(),
        order_amount = %payload.order_amount,
        supplier_tier = %payload.supplier_tier,
        buyer_tier = %payload.buyer_tier,
        "Calculating fees"
    );

    let fees = services::calculate_fees(
        state.store.as_ref(),
        payload.order_amount,
        &payload.supplier_tier,
        &payload.buyer_tier,
    )
    .await?;

    Ok(Json(fees))
}
