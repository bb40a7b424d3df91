//! Subscription endpoints called by the account pages.

use axum::{extract::State, Json};
use marketplace_core::error::AppError;
use marketplace_core::middleware::RequestId;
use validator::Validate;

use crate::{
    dtos::{
        CancelSubscriptionRequest, CancelSubscriptionResponse, CreatePortalSessionRequest,
        ResumeSubscriptionResponse,
    },
    middleware::AuthUser,
    services::{self, PortalSessionUrl},
    AppState,
};

pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    request_id: RequestId,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> Result<Json<CancelSubscriptionResponse>, AppError> {
    tracing::info!(
        user_id = %user.user_id(),
        cancel_immediately = payload.cancel_immediately,
        "Cancelling subscription"
    );

    let outcome = services::cancel_subscription(
        state.store.as_ref(),
        state.processor.as_ref(),
        user.user_id(),
        payload.cancel_immediately,
        Some(request_id.as_str()),
    )
    .await?;

    let message = if outcome.canceled_immediately {
        "Subscription canceled".to_string()
    } else {
        "Subscription will be canceled at the end of the billing period".to_string()
    };

    Ok(Json(CancelSubscriptionResponse {
        success: true,
        message,
        subscription: outcome.subscription,
    }))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    user: AuthUser,
    request_id: RequestId,
) -> Result<Json<ResumeSubscriptionResponse>, AppError> {
    tracing::info!(user_id = %user.user_id(), "Resuming subscription");

    let subscription = services::resume_subscription(
        state.store.as_ref(),
        state.processor.as_ref(),
        user.user_id(),
        Some(request_id.as_str()),
    )
    .await?;

    Ok(Json(ResumeSubscriptionResponse {
        success: true,
        subscription,
    }))
}

pub async fn create_billing_portal_session(
    State(state): State<AppState>,
    user: AuthUser,
    request_id: RequestId,
    Json(payload): Json<CreatePortalSessionRequest>,
) -> Result<Json<PortalSessionUrl>, AppError> {
    payload.validate()?;

    let return_url = payload
        .return_url
        .unwrap_or_else(|| state.config.billing.default_return_url.clone());

    tracing::info!(user_id = %user.user_id(), "Creating billing portal session");

    let session = services::create_billing_portal_session(
        state.store.as_ref(),
        state.processor.as_ref(),
        user.user_id(),
        &return_url,
        Some(request_id.as_str()),
    )
    .await?;

    Ok(Json(session))
}
