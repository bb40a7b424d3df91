use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use marketplace_core::error::AppError;

use crate::{
    dtos::WebhookAck,
    services::{self, StripeEvent},
    AppState,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a Stripe event. The raw body is needed for signature checks.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if !state.webhooks.is_configured() {
        tracing::warn!("Stripe webhook received but no webhook secret is configured");
        return Err(AppError::ServiceUnavailable);
    }

    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing Stripe-Signature header")))?;

    state.webhooks.verify(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature"))
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid event payload: {}", e)))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    let outcome = services::apply_event(state.store.as_ref(), &event).await?;

    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}
