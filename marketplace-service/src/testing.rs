//! In-memory doubles for unit and router tests.

use crate::config::{
    AuthConfig, BillingPortalConfig, DatabaseConfig, MarketplaceConfig, PresenceConfig,
    StripeConfig,
};
use crate::models::{
    CommissionRate, NewSubscriptionEvent, SubscriptionEvent, SubscriptionStatus, SubscriptionTier,
    SubscriptionUpdate, UserSubscription, UserType,
};
use crate::presence::PresenceHub;
use crate::services::{
    BillingStore, JwtVerifier, PaymentProcessor, PortalSession, ProcessorSubscription,
    WebhookVerifier,
};
use crate::AppState;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use marketplace_core::error::AppError;
use rust_decimal::Decimal;
use secrecy::Secret;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn tier(key: &str, user_type: UserType, is_free: bool, fee: &str) -> SubscriptionTier {
    SubscriptionTier {
        id: Uuid::new_v4(),
        tier_key: key.to_string(),
        name: key.replace('_', " "),
        user_type: user_type.as_str().to_string(),
        price_monthly: if is_free { Decimal::ZERO } else { Decimal::from(49) },
        price_yearly: if is_free { Decimal::ZERO } else { Decimal::from(490) },
        transaction_fee_percent: Decimal::from_str(fee).unwrap(),
        trial_days: if is_free { 0 } else { 14 },
        is_free,
    }
}

pub fn subscription_for(user_id: Uuid, tier_id: Uuid, status: SubscriptionStatus) -> UserSubscription {
    let now = Utc::now();
    UserSubscription {
        id: Uuid::new_v4(),
        user_id,
        tier_id,
        status: status.as_str().to_string(),
        billing_cycle: "monthly".to_string(),
        current_period_start: Some(now),
        current_period_end: Some(now + chrono::Duration::days(30)),
        cancel_at_period_end: false,
        stripe_subscription_id: None,
        stripe_customer_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
struct StoreData {
    tiers: Vec<SubscriptionTier>,
    rates: Vec<CommissionRate>,
    subscriptions: Vec<UserSubscription>,
    roles: Vec<(Uuid, String)>,
    events: Vec<SubscriptionEvent>,
}

#[derive(Default, Clone)]
pub struct InMemoryStore {
    data: Arc<Mutex<StoreData>>,
    unavailable: bool,
    /// `stripe_event_recorded` always answers `false`, as it would for two
    /// deliveries checked before either one is recorded.
    stale_event_checks: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails like a lost database.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_stale_event_checks(mut self) -> Self {
        self.stale_event_checks = true;
        self
    }

    pub fn with_tier(self, tier: SubscriptionTier) -> Self {
        self.data.lock().unwrap().tiers.push(tier);
        self
    }

    pub fn with_commission_rate(self, rate: CommissionRate) -> Self {
        self.data.lock().unwrap().rates.push(rate);
        self
    }

    pub fn with_subscription(self, subscription: UserSubscription) -> Self {
        self.data.lock().unwrap().subscriptions.push(subscription);
        self
    }

    pub fn with_roles(self, user_id: Uuid, roles: &[&str]) -> Self {
        self.data
            .lock()
            .unwrap()
            .roles
            .extend(roles.iter().map(|r| (user_id, r.to_string())));
        self
    }

    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.data.lock().unwrap().events.clone()
    }

    pub fn subscription(&self, id: Uuid) -> Option<UserSubscription> {
        self.data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    fn check(&self) -> Result<(), AppError> {
        if self.unavailable {
            Err(AppError::DatabaseError(anyhow!("connection refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        self.check()
    }

    async fn find_commission_rate(
        &self,
        tier_name: &str,
        user_type: UserType,
        order_amount: Decimal,
    ) -> Result<Option<CommissionRate>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .rates
            .iter()
            .filter(|r| r.tier_name == tier_name && r.user_type == user_type.as_str())
            .filter(|r| r.contains(order_amount))
            .max_by_key(|r| r.order_min)
            .cloned())
    }

    async fn list_commission_rates(&self) -> Result<Vec<CommissionRate>, AppError> {
        self.check()?;
        Ok(self.data.lock().unwrap().rates.clone())
    }

    async fn get_tier(&self, tier_id: Uuid) -> Result<Option<SubscriptionTier>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .tiers
            .iter()
            .find(|t| t.id == tier_id)
            .cloned())
    }

    async fn get_tier_by_key(&self, tier_key: &str) -> Result<Option<SubscriptionTier>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .tiers
            .iter()
            .find(|t| t.tier_key == tier_key)
            .cloned())
    }

    async fn get_free_tier(
        &self,
        user_type: UserType,
    ) -> Result<Option<SubscriptionTier>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .tiers
            .iter()
            .find(|t| t.is_free && t.user_type == user_type.as_str())
            .cloned())
    }

    async fn list_tiers(
        &self,
        user_type: Option<UserType>,
    ) -> Result<Vec<SubscriptionTier>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .tiers
            .iter()
            .filter(|t| user_type.map_or(true, |u| t.user_type == u.as_str()))
            .cloned()
            .collect())
    }

    async fn get_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| s.status().is_some_and(|status| status.is_active()))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_subscription_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .cloned())
    }

    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .roles
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, role)| role.clone())
            .collect())
    }

    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        Ok(data
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .map(|subscription| {
                update.apply_to(subscription);
                subscription.clone()
            }))
    }

    async fn record_event(
        &self,
        event: &NewSubscriptionEvent,
    ) -> Result<SubscriptionEvent, AppError> {
        self.check()?;
        let mut data = self.data.lock().unwrap();
        if let Some(stripe_event_id) = &event.stripe_event_id {
            if data
                .events
                .iter()
                .any(|e| e.stripe_event_id.as_ref() == Some(stripe_event_id))
            {
                return Err(AppError::Conflict(anyhow!(
                    "duplicate stripe_event_id {}",
                    stripe_event_id
                )));
            }
        }
        let recorded = SubscriptionEvent {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            subscription_id: event.subscription_id,
            event_type: event.event_type.as_str().to_string(),
            stripe_event_id: event.stripe_event_id.clone(),
            payload: event.payload.clone(),
            created_at: Utc::now(),
        };
        data.events.push(recorded.clone());
        Ok(recorded)
    }

    async fn stripe_event_recorded(&self, stripe_event_id: &str) -> Result<bool, AppError> {
        self.check()?;
        if self.stale_event_checks {
            return Ok(false);
        }
        Ok(self
            .data
            .lock()
            .unwrap()
            .events
            .iter()
            .any(|e| e.stripe_event_id.as_deref() == Some(stripe_event_id)))
    }
}

/// Payment processor double that records `"<operation>:<id>"` per call.
#[derive(Default, Clone)]
pub struct RecordingProcessor {
    calls: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, id: &str) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("Stripe error (api_error): simulated outage"));
        }
        self.calls.lock().unwrap().push(format!("{}:{}", operation, id));
        Ok(())
    }

    fn remote(id: &str, status: &str, cancel_at_period_end: bool) -> ProcessorSubscription {
        ProcessorSubscription {
            id: id.to_string(),
            status: status.to_string(),
            cancel_at_period_end,
            current_period_start: None,
            current_period_end: None,
            customer: None,
        }
    }
}

#[async_trait]
impl PaymentProcessor for RecordingProcessor {
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        _request_id: Option<&str>,
    ) -> anyhow::Result<ProcessorSubscription> {
        self.record("cancel_subscription", subscription_id)?;
        Ok(Self::remote(subscription_id, "canceled", false))
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
        _request_id: Option<&str>,
    ) -> anyhow::Result<ProcessorSubscription> {
        self.record("cancel_at_period_end", subscription_id)?;
        Ok(Self::remote(subscription_id, "active", true))
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
        _request_id: Option<&str>,
    ) -> anyhow::Result<ProcessorSubscription> {
        self.record("resume_subscription", subscription_id)?;
        Ok(Self::remote(subscription_id, "active", false))
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
        _request_id: Option<&str>,
    ) -> anyhow::Result<PortalSession> {
        self.record("create_billing_portal_session", customer_id)?;
        Ok(PortalSession {
            id: "bps_test".to_string(),
            url: format!("https://billing.example.test/session/{}", customer_id),
        })
    }
}

pub fn test_config() -> MarketplaceConfig {
    MarketplaceConfig {
        common: marketplace_core::config::Config::default(),
        service_name: "marketplace-service".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://localhost/unused".to_string()),
            max_connections: 1,
            min_connections: 0,
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(JWT_SECRET.to_string()),
            jwt_audience: "authenticated".to_string(),
        },
        stripe: StripeConfig {
            secret_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: "http://stripe.invalid/v1".to_string(),
        },
        billing: BillingPortalConfig {
            default_return_url: "https://app.example.test/account".to_string(),
        },
        presence: PresenceConfig {
            typing_ttl: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
        },
    }
}

pub fn test_state(store: InMemoryStore, processor: RecordingProcessor) -> AppState {
    let config = test_config();
    AppState {
        jwt: Arc::new(JwtVerifier::new(
            &config.auth.jwt_secret,
            config.auth.jwt_audience.clone(),
        )),
        webhooks: Arc::new(WebhookVerifier::new(config.stripe.webhook_secret.clone())),
        presence: PresenceHub::new(config.presence.typing_ttl),
        store: Arc::new(store),
        processor: Arc::new(processor),
        config,
    }
}

/// Session token for `user_id`, signed the way the backend signs them.
pub fn bearer_token(user_id: Uuid) -> String {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &serde_json::json!({
            "sub": user_id,
            "aud": "authenticated",
            "exp": Utc::now().timestamp() + 3600,
            "role": "authenticated",
        }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}
