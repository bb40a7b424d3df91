//! Configuration module for marketplace-service.

use marketplace_core::config as core_config;
use marketplace_core::error::AppError;
use secrecy::Secret;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub billing: BillingPortalConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret the backend signs session tokens with.
    pub jwt_secret: Secret<String>,
    pub jwt_audience: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Empty when payments are not configured for this environment.
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct BillingPortalConfig {
    /// Where the portal sends users back when the request names no URL.
    pub default_return_url: String,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub typing_ttl: Duration,
    pub sweep_interval: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Milliseconds from `key`, never below 1 ms.
fn millis_or(key: &str, default: u64) -> Duration {
    Duration::from_millis(parsed_or(key, default).max(1))
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
}

impl MarketplaceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: var_or("MARKETPLACE_SERVICE_NAME", "marketplace-service"),
            log_level: var_or("MARKETPLACE_LOG_LEVEL", "info"),
            otlp_endpoint: env::var("MARKETPLACE_OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: Secret::new(required("MARKETPLACE_DATABASE_URL")?),
                max_connections: parsed_or("MARKETPLACE_DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or("MARKETPLACE_DATABASE_MIN_CONNECTIONS", 2),
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(required("MARKETPLACE_JWT_SECRET")?),
                jwt_audience: var_or("MARKETPLACE_JWT_AUDIENCE", "authenticated"),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(var_or("MARKETPLACE_STRIPE_SECRET_KEY", "")),
                webhook_secret: Secret::new(var_or("MARKETPLACE_STRIPE_WEBHOOK_SECRET", "")),
                api_base_url: var_or("MARKETPLACE_STRIPE_API_BASE_URL", "https://api.stripe.com/v1"),
            },
            billing: BillingPortalConfig {
                default_return_url: var_or(
                    "MARKETPLACE_PORTAL_RETURN_URL",
                    "http://localhost:3000/account/billing",
                ),
            },
            presence: PresenceConfig {
                typing_ttl: millis_or("MARKETPLACE_TYPING_TTL_MS", 3000),
                sweep_interval: millis_or("MARKETPLACE_PRESENCE_SWEEP_MS", 1000),
            },
        })
    }
}
