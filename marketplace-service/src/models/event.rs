//! Append-only subscription audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEventType {
    SubscriptionCanceled,
    SubscriptionCancelScheduled,
    SubscriptionResumed,
    SubscriptionUpdated,
    SubscriptionDeleted,
    BillingPortalOpened,
}

impl SubscriptionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionEventType::SubscriptionCanceled => "subscription_canceled",
            SubscriptionEventType::SubscriptionCancelScheduled => "subscription_cancel_scheduled",
            SubscriptionEventType::SubscriptionResumed => "subscription_resumed",
            SubscriptionEventType::SubscriptionUpdated => "subscription_updated",
            SubscriptionEventType::SubscriptionDeleted => "subscription_deleted",
            SubscriptionEventType::BillingPortalOpened => "billing_portal_opened",
        }
    }
}

/// A row of `subscription_events`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub event_type: String,
    pub stripe_event_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Input for appending an audit event.
#[derive(Debug, Clone)]
pub struct NewSubscriptionEvent {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub event_type: SubscriptionEventType,
    /// Processor event id for webhook-originated events; used for dedup.
    pub stripe_event_id: Option<String>,
    pub payload: serde_json::Value,
}
