//! Subscription cancellation, resumption and billing portal sessions.
//!
//! Every operation mutates the processor first and mirrors the result
//! locally only once the processor call succeeded, then appends an audit
//! event.

use crate::models::{
    NewSubscriptionEvent, SubscriptionEventType, SubscriptionStatus, SubscriptionUpdate,
    UserSubscription,
};
use crate::services::metrics::record_subscription_operation;
use crate::services::store::BillingStore;
use crate::services::stripe::{PaymentProcessor, ProcessorSubscription};
use chrono::{DateTime, Utc};
use marketplace_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub subscription: UserSubscription,
    pub canceled_immediately: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSessionUrl {
    pub url: String,
}

fn unix_to_datetime(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn processor_error(operation: &'static str, e: anyhow::Error) -> AppError {
    record_subscription_operation(operation, "provider_error");
    AppError::PaymentProvider(e.to_string())
}

fn billing_subscription_id(subscription: &UserSubscription) -> Result<&str, AppError> {
    subscription
        .stripe_subscription_id
        .as_deref()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription has no billing record")))
}

async fn latest_subscription(
    store: &dyn BillingStore,
    user_id: Uuid,
) -> Result<UserSubscription, AppError> {
    store
        .get_latest_subscription(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No subscription found")))
}

async fn persist(
    store: &dyn BillingStore,
    subscription: &UserSubscription,
    update: &SubscriptionUpdate,
) -> Result<UserSubscription, AppError> {
    store
        .update_subscription(subscription.id, update)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))
}

/// Cancel the user's subscription now, or schedule it for the end of the
/// current billing period.
#[instrument(skip(store, processor, request_id))]
pub async fn cancel_subscription(
    store: &dyn BillingStore,
    processor: &dyn PaymentProcessor,
    user_id: Uuid,
    cancel_immediately: bool,
    request_id: Option<&str>,
) -> Result<CancellationOutcome, AppError> {
    let subscription = latest_subscription(store, user_id).await?;

    if subscription.status() == Some(SubscriptionStatus::Canceled) {
        record_subscription_operation("cancel", "conflict");
        return Err(AppError::Conflict(anyhow::anyhow!("Subscription is already canceled")));
    }
    if !cancel_immediately && subscription.cancel_at_period_end {
        record_subscription_operation("cancel", "conflict");
        return Err(AppError::Conflict(anyhow::anyhow!("Cancellation is already scheduled")));
    }

    let stripe_id = billing_subscription_id(&subscription)?;
    let previous_status = subscription.status.clone();

    let (update, event_type) = if cancel_immediately {
        let remote: ProcessorSubscription = processor
            .cancel_subscription(stripe_id, request_id)
            .await
            .map_err(|e| processor_error("cancel", e))?;
        (
            SubscriptionUpdate {
                status: Some(SubscriptionStatus::Canceled),
                cancel_at_period_end: Some(false),
                current_period_end: unix_to_datetime(remote.current_period_end),
                ..Default::default()
            },
            SubscriptionEventType::SubscriptionCanceled,
        )
    } else {
        let remote = processor
            .cancel_at_period_end(stripe_id, request_id)
            .await
            .map_err(|e| processor_error("cancel", e))?;
        (
            SubscriptionUpdate {
                cancel_at_period_end: Some(true),
                current_period_start: unix_to_datetime(remote.current_period_start),
                current_period_end: unix_to_datetime(remote.current_period_end),
                ..Default::default()
            },
            SubscriptionEventType::SubscriptionCancelScheduled,
        )
    };

    let updated = persist(store, &subscription, &update).await?;

    store
        .record_event(&NewSubscriptionEvent {
            user_id,
            subscription_id: Some(updated.id),
            event_type,
            stripe_event_id: None,
            payload: json!({
                "cancelImmediately": cancel_immediately,
                "previousStatus": previous_status,
                "stripeSubscriptionId": stripe_id,
                "currentPeriodEnd": updated.current_period_end,
            }),
        })
        .await?;

    record_subscription_operation("cancel", "success");
    info!(
        subscription_id = %updated.id,
        cancel_immediately,
        status = %updated.status,
        "Subscription cancellation applied"
    );

    Ok(CancellationOutcome {
        subscription: updated,
        canceled_immediately: cancel_immediately,
    })
}

/// Clear a scheduled cancellation.
#[instrument(skip(store, processor, request_id))]
pub async fn resume_subscription(
    store: &dyn BillingStore,
    processor: &dyn PaymentProcessor,
    user_id: Uuid,
    request_id: Option<&str>,
) -> Result<UserSubscription, AppError> {
    let subscription = latest_subscription(store, user_id).await?;

    if !subscription.cancel_at_period_end
        || subscription.status() == Some(SubscriptionStatus::Canceled)
    {
        record_subscription_operation("resume", "conflict");
        return Err(AppError::Conflict(anyhow::anyhow!("No scheduled cancellation to resume")));
    }

    let stripe_id = billing_subscription_id(&subscription)?;

    processor
        .resume_subscription(stripe_id, request_id)
        .await
        .map_err(|e| processor_error("resume", e))?;

    let updated = persist(
        store,
        &subscription,
        &SubscriptionUpdate {
            cancel_at_period_end: Some(false),
            ..Default::default()
        },
    )
    .await?;

    store
        .record_event(&NewSubscriptionEvent {
            user_id,
            subscription_id: Some(updated.id),
            event_type: SubscriptionEventType::SubscriptionResumed,
            stripe_event_id: None,
            payload: json!({ "stripeSubscriptionId": stripe_id }),
        })
        .await?;

    record_subscription_operation("resume", "success");
    info!(subscription_id = %updated.id, "Scheduled cancellation cleared");

    Ok(updated)
}

/// Open a processor-hosted billing portal for the user's customer record.
#[instrument(skip(store, processor, request_id))]
pub async fn create_billing_portal_session(
    store: &dyn BillingStore,
    processor: &dyn PaymentProcessor,
    user_id: Uuid,
    return_url: &str,
    request_id: Option<&str>,
) -> Result<PortalSessionUrl, AppError> {
    let subscription = latest_subscription(store, user_id).await?;

    let customer_id = subscription.stripe_customer_id.as_deref().ok_or_else(|| {
        warn!(subscription_id = %subscription.id, "Subscription has no billing customer");
        AppError::NotFound(anyhow::anyhow!("No billing customer found"))
    })?;

    let session = processor
        .create_billing_portal_session(customer_id, return_url, request_id)
        .await
        .map_err(|e| processor_error("billing_portal", e))?;

    store
        .record_event(&NewSubscriptionEvent {
            user_id,
            subscription_id: Some(subscription.id),
            event_type: SubscriptionEventType::BillingPortalOpened,
            stripe_event_id: None,
            payload: json!({ "sessionId": session.id, "returnUrl": return_url }),
        })
        .await?;

    record_subscription_operation("billing_portal", "success");

    Ok(PortalSessionUrl { url: session.url })
}
