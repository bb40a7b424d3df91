//! PostgreSQL access for marketplace-service.

use crate::models::{
    CommissionRate, NewSubscriptionEvent, SubscriptionEvent, SubscriptionTier, SubscriptionUpdate,
    UserSubscription, UserType,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;
use async_trait::async_trait;
use marketplace_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "marketplace-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Tiers and commission rates
    // =========================================================================

    #[instrument(skip(self), fields(tier_name = %tier_name, user_type = %user_type))]
    async fn find_commission_rate(
        &self,
        tier_name: &str,
        user_type: UserType,
        order_amount: Decimal,
    ) -> Result<Option<CommissionRate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_commission_rate"])
            .start_timer();

        let rate = sqlx::query_as::<_, CommissionRate>(
            r#"
            SELECT id, tier_name, user_type, order_min, order_max, base_rate
            FROM commission_rates
            WHERE tier_name = $1
              AND user_type = $2
              AND order_min <= $3
              AND (order_max IS NULL OR $3 < order_max)
            ORDER BY order_min DESC
            LIMIT 1
            "#,
        )
        .bind(tier_name)
        .bind(user_type.as_str())
        .bind(order_amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get commission rate: {}", e))
        })?;

        timer.observe_duration();

        Ok(rate)
    }

    #[instrument(skip(self))]
    async fn list_commission_rates(&self) -> Result<Vec<CommissionRate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_commission_rates"])
            .start_timer();

        let rates = sqlx::query_as::<_, CommissionRate>(
            r#"
            SELECT id, tier_name, user_type, order_min, order_max, base_rate
            FROM commission_rates
            ORDER BY tier_name, user_type, order_min
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list commission rates: {}", e))
        })?;

        timer.observe_duration();

        Ok(rates)
    }

    #[instrument(skip(self))]
    async fn get_tier(&self, tier_id: Uuid) -> Result<Option<SubscriptionTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tier"])
            .start_timer();

        let tier = sqlx::query_as::<_, SubscriptionTier>(
            r#"
            SELECT id, tier_key, name, user_type, price_monthly, price_yearly, transaction_fee_percent, trial_days, is_free
            FROM subscription_tiers
            WHERE id = $1
            "#,
        )
        .bind(tier_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get tier: {}", e)))?;

        timer.observe_duration();

        Ok(tier)
    }

    #[instrument(skip(self))]
    async fn get_tier_by_key(&self, tier_key: &str) -> Result<Option<SubscriptionTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tier_by_key"])
            .start_timer();

        let tier = sqlx::query_as::<_, SubscriptionTier>(
            r#"
            SELECT id, tier_key, name, user_type, price_monthly, price_yearly, transaction_fee_percent, trial_days, is_free
            FROM subscription_tiers
            WHERE tier_key = $1
            "#,
        )
        .bind(tier_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get tier: {}", e)))?;

        timer.observe_duration();

        Ok(tier)
    }

    #[instrument(skip(self), fields(user_type = %user_type))]
    async fn get_free_tier(
        &self,
        user_type: UserType,
    ) -> Result<Option<SubscriptionTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_free_tier"])
            .start_timer();

        let tier = sqlx::query_as::<_, SubscriptionTier>(
            r#"
            SELECT id, tier_key, name, user_type, price_monthly, price_yearly, transaction_fee_percent, trial_days, is_free
            FROM subscription_tiers
            WHERE user_type = $1 AND is_free
            LIMIT 1
            "#,
        )
        .bind(user_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get free tier: {}", e)))?;

        timer.observe_duration();

        Ok(tier)
    }

    #[instrument(skip(self))]
    async fn list_tiers(
        &self,
        user_type: Option<UserType>,
    ) -> Result<Vec<SubscriptionTier>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tiers"])
            .start_timer();

        let tiers = sqlx::query_as::<_, SubscriptionTier>(
            r#"
            SELECT id, tier_key, name, user_type, price_monthly, price_yearly, transaction_fee_percent, trial_days, is_free
            FROM subscription_tiers
            WHERE ($1::TEXT IS NULL OR user_type = $1)
            ORDER BY user_type, price_monthly, tier_key
            "#,
        )
        .bind(user_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list tiers: {}", e)))?;

        timer.observe_duration();

        Ok(tiers)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT id, user_id, tier_id, status, billing_cycle, current_period_start, current_period_end, cancel_at_period_end, stripe_subscription_id, stripe_customer_id, created_at, updated_at
            FROM user_subscriptions
            WHERE user_id = $1 AND status IN ('active', 'trialing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get active subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn get_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_latest_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT id, user_id, tier_id, status, billing_cycle, current_period_start, current_period_end, cancel_at_period_end, stripe_subscription_id, stripe_customer_id, created_at, updated_at
            FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn get_subscription_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription_by_stripe_id"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT id, user_id, tier_id, status, billing_cycle, current_period_start, current_period_end, cancel_at_period_end, stripe_subscription_id, stripe_customer_id, created_at, updated_at
            FROM user_subscriptions
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn get_user_roles(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user_roles"])
            .start_timer();

        let roles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT role FROM user_roles WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get user roles: {}", e)))?;

        timer.observe_duration();

        Ok(roles)
    }

    #[instrument(skip(self, update), fields(subscription_id = %subscription_id))]
    async fn update_subscription(
        &self,
        subscription_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET status = COALESCE($2, status),
                cancel_at_period_end = COALESCE($3, cancel_at_period_end),
                current_period_start = COALESCE($4, current_period_start),
                current_period_end = COALESCE($5, current_period_end),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, tier_id, status, billing_cycle, current_period_start, current_period_end, cancel_at_period_end, stripe_subscription_id, stripe_customer_id, created_at, updated_at
            "#,
        )
        .bind(subscription_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.cancel_at_period_end)
        .bind(update.current_period_start)
        .bind(update.current_period_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    // =========================================================================
    // Audit events
    // =========================================================================

    #[instrument(skip(self, event), fields(user_id = %event.user_id, event_type = event.event_type.as_str()))]
    async fn record_event(
        &self,
        event: &NewSubscriptionEvent,
    ) -> Result<SubscriptionEvent, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_event"])
            .start_timer();

        let recorded = sqlx::query_as::<_, SubscriptionEvent>(
            r#"
            INSERT INTO subscription_events (id, user_id, subscription_id, event_type, stripe_event_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, subscription_id, event_type, stripe_event_id, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.user_id)
        .bind(event.subscription_id)
        .bind(event.event_type.as_str())
        .bind(&event.stripe_event_id)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(
                anyhow::anyhow!("Processor event already recorded: {}", db),
            ),
            e => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to record subscription event: {}",
                e
            )),
        })?;

        timer.observe_duration();
        info!(event_id = %recorded.id, "Subscription event recorded");

        Ok(recorded)
    }

    #[instrument(skip(self))]
    async fn stripe_event_recorded(&self, stripe_event_id: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stripe_event_recorded"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM subscription_events WHERE stripe_event_id = $1)
            "#,
        )
        .bind(stripe_event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check event: {}", e)))?;

        timer.observe_duration();

        Ok(exists)
    }
}
