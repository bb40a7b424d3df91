use crate::models::{UserSubscription, UserType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_supplier_tier() -> String {
    "supplier_free".to_string()
}

fn default_buyer_tier() -> String {
    "buyer_free".to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CalculateFeesRequest {
    /// Accepts a JSON number or a decimal string.
    pub order_amount: Decimal,
    #[serde(default = "default_supplier_tier")]
    #[validate(length(min = 1, max = 64))]
    pub supplier_tier: String,
    #[serde(default = "default_buyer_tier")]
    #[validate(length(min = 1, max = 64))]
    pub buyer_tier: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TierQuery {
    pub user_type: Option<UserType>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub cancel_immediately: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionResponse {
    pub success: bool,
    pub message: String,
    pub subscription: UserSubscription,
}

#[derive(Debug, Serialize)]
pub struct ResumeSubscriptionResponse {
    pub success: bool,
    pub subscription: UserSubscription,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortalSessionRequest {
    #[validate(url)]
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

fn default_presence_status() -> String {
    "online".to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackPresenceRequest {
    #[serde(default = "default_presence_status")]
    #[validate(length(min = 1, max = 32))]
    pub status: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub is_typing: bool,
}
