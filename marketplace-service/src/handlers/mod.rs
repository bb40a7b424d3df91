//! HTTP handlers for marketplace-service.

pub mod fees;
pub mod presence;
pub mod subscriptions;
pub mod tiers;
pub mod webhooks;
