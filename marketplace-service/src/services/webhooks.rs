//! Mirrors processor-side subscription changes into `user_subscriptions`.
//!
//! This is what moves a subscription scheduled to cancel at period end into
//! `canceled` once the period boundary passes.

use crate::models::{
    NewSubscriptionEvent, SubscriptionEventType, SubscriptionStatus, SubscriptionUpdate,
};
use crate::services::metrics::record_webhook_event;
use crate::services::store::BillingStore;
use crate::services::stripe::{ProcessorSubscription, StripeEvent};
use chrono::DateTime;
use marketplace_core::error::AppError;
use serde::Serialize;
use tracing::{info, instrument, warn};

pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

#[instrument(skip(store, event), fields(event_id = %event.id, event_type = %event.event_type))]
pub async fn apply_event(
    store: &dyn BillingStore,
    event: &StripeEvent,
) -> Result<WebhookOutcome, AppError> {
    let outcome = apply(store, event).await?;
    record_webhook_event(&event.event_type, outcome.as_str());
    Ok(outcome)
}

async fn apply(store: &dyn BillingStore, event: &StripeEvent) -> Result<WebhookOutcome, AppError> {
    let deleted = match event.event_type.as_str() {
        SUBSCRIPTION_UPDATED => false,
        SUBSCRIPTION_DELETED => true,
        _ => return Ok(WebhookOutcome::Ignored),
    };

    if store.stripe_event_recorded(&event.id).await? {
        info!("Webhook event already applied");
        return Ok(WebhookOutcome::Duplicate);
    }

    let remote: ProcessorSubscription = serde_json::from_value(event.data.object.clone())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subscription object: {}", e)))?;

    let Some(local) = store.get_subscription_by_stripe_id(&remote.id).await? else {
        warn!(stripe_subscription_id = %remote.id, "Webhook for unknown subscription");
        return Ok(WebhookOutcome::Ignored);
    };

    let update = if deleted {
        SubscriptionUpdate {
            status: Some(SubscriptionStatus::Canceled),
            cancel_at_period_end: Some(false),
            ..Default::default()
        }
    } else {
        let status = SubscriptionStatus::from_string(&remote.status);
        if status.is_none() {
            warn!(status = %remote.status, "Unmodelled processor status, keeping local status");
        }
        SubscriptionUpdate {
            status,
            cancel_at_period_end: Some(remote.cancel_at_period_end),
            current_period_start: remote
                .current_period_start
                .and_then(|s| DateTime::from_timestamp(s, 0)),
            current_period_end: remote
                .current_period_end
                .and_then(|s| DateTime::from_timestamp(s, 0)),
        }
    };

    let Some(updated) = store.update_subscription(local.id, &update).await? else {
        return Ok(WebhookOutcome::Ignored);
    };

    let recorded = store
        .record_event(&NewSubscriptionEvent {
            user_id: updated.user_id,
            subscription_id: Some(updated.id),
            event_type: if deleted {
                SubscriptionEventType::SubscriptionDeleted
            } else {
                SubscriptionEventType::SubscriptionUpdated
            },
            stripe_event_id: Some(event.id.clone()),
            payload: event.data.object.clone(),
        })
        .await;

    match recorded {
        Ok(_) => {}
        // A concurrent delivery of the same event recorded it first.
        Err(AppError::Conflict(_)) => {
            info!("Webhook event recorded by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }
        Err(e) => return Err(e),
    }

    info!(
        subscription_id = %updated.id,
        status = %updated.status,
        cancel_at_period_end = updated.cancel_at_period_end,
        "Subscription mirrored from processor"
    );

    Ok(WebhookOutcome::Applied)
}
