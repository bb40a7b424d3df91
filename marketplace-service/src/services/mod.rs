//! Services module for marketplace-service.

pub mod database;
pub mod fees;
pub mod jwt;
pub mod metrics;
pub mod store;
pub mod stripe;
pub mod subscriptions;
pub mod tiers;
pub mod webhooks;

pub use database::Database;
pub use fees::{calculate_fees, FeeCalculation, RateSource};
pub use jwt::{JwtVerifier, SessionClaims};
pub use metrics::{
    get_metrics, init_metrics, record_fee_calculation, record_payment_provider_request,
    record_presence_event, record_subscription_operation, record_webhook_event,
};
pub use store::BillingStore;
pub use stripe::{
    PaymentProcessor, PortalSession, ProcessorSubscription, SignatureError, StripeClient,
    StripeEvent, WebhookVerifier,
};
pub use subscriptions::{
    cancel_subscription, create_billing_portal_session, resume_subscription, CancellationOutcome,
    PortalSessionUrl,
};
pub use tiers::{list_tiers, resolve_effective_tier, EffectiveTier, TierSource};
pub use webhooks::{apply_event, WebhookOutcome};
