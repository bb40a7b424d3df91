//! Storage seam for the billing domain.
//!
//! Handlers and services receive a `BillingStore` through application state
//! instead of reaching for a process-wide client. [`Database`](super::Database)
//! is the PostgreSQL implementation.

use crate::models::{
    CommissionRate, NewSubscriptionEvent, SubscriptionEvent, SubscriptionTier, SubscriptionUpdate,
    UserSubscription, UserType,
};
use async_trait::async_trait;
use marketplace_core::error::AppError;
use rust_decimal::Decimal;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Liveness check for the backing store.
    async fn ping(&self) -> Result<(), AppError>;

    /// The bracket of `(tier_name, user_type)` containing `order_amount`.
    async fn find_commission_rate(
        &self,
        tier_name: &str,
        user_type: UserType,
        order_amount: Decimal,
    ) -> Result<Option<CommissionRate>, AppError>;

    /// Every bracket, ordered by `(tier_name, user_type, order_min)`.
    async fn list_commission_rates(&self) -> Result<Vec<CommissionRate>, AppError>;

    async fn get_tier(&self, tier_id: Uuid) -> Result<Option<SubscriptionTier>, AppError>;

    async fn get_tier_by_key(&self, tier_key: &str) -> Result<Option<SubscriptionTier>, AppError>;

    /// The canonical free tier of `user_type`.
    async fn get_free_tier(&self, user_type: UserType)
        -> Result<Option<SubscriptionTier>, AppError>;

    async fn list_tiers(
        &self,
        user_type: Option<UserType>,
    ) -> Result<Vec<SubscriptionTier>, AppError>;

    /// Most recent subscription in `active` or `trialing` state.
    async fn get_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    /// Most recent subscription regardless of state.
    async fn get_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError>;

    async fn get_subscription_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError>;

    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;

    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<UserSubscription>, AppError>;

    async fn record_event(
        &self,
        event: &NewSubscriptionEvent,
    ) -> Result<SubscriptionEvent, AppError>;

    /// Whether a processor webhook event has already been applied.
    async fn stripe_event_recorded(&self, stripe_event_id: &str) -> Result<bool, AppError>;
}
