//! Application startup and lifecycle management.

use crate::config::MarketplaceConfig;
use crate::handlers;
use crate::middleware::auth_middleware;
use crate::models::validate_brackets;
use crate::presence::PresenceHub;
use crate::services::{
    get_metrics, init_metrics, BillingStore, Database, JwtVerifier, PaymentProcessor,
    StripeClient, WebhookVerifier,
};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use marketplace_core::error::AppError;
use marketplace_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware,
};
use marketplace_core::observability::REQUEST_ID_HEADER;
use secrecy::ExposeSecret;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MarketplaceConfig,
    pub store: Arc<dyn BillingStore>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub jwt: Arc<JwtVerifier>,
    pub webhooks: Arc<WebhookVerifier>,
    pub presence: PresenceHub,
}

/// Health check endpoint for Docker/K8s liveness checks.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness checks.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

fn cors_layer(config: &MarketplaceConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.common.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .common
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Assemble every route and middleware layer around `state`.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/fees/calculate", post(handlers::fees::calculate_fees))
        .route("/tiers/me", get(handlers::tiers::get_my_tier))
        .route(
            "/functions/cancel-subscription",
            post(handlers::subscriptions::cancel_subscription),
        )
        .route(
            "/functions/resume-subscription",
            post(handlers::subscriptions::resume_subscription),
        )
        .route(
            "/functions/create-billing-portal-session",
            post(handlers::subscriptions::create_billing_portal_session),
        )
        .route(
            "/presence/:channel",
            get(handlers::presence::get_snapshot),
        )
        .route(
            "/presence/:channel/track",
            post(handlers::presence::track).delete(handlers::presence::untrack),
        )
        .route(
            "/presence/:channel/typing",
            post(handlers::presence::set_typing),
        )
        .route(
            "/presence/:channel/stream",
            get(handlers::presence::stream),
        )
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/tiers", get(handlers::tiers::list_tiers))
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        .merge(protected)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Outside the trace layer so the span sees a minted id.
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MarketplaceConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        match db.list_commission_rates().await {
            Ok(rates) => {
                if let Err(e) = validate_brackets(&rates) {
                    tracing::warn!(error = %e, "Commission brackets are inconsistent");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Could not load commission brackets"),
        }

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - billing features will fail");
        }

        let webhooks = WebhookVerifier::new(config.stripe.webhook_secret.clone());
        if !webhooks.is_configured() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be rejected");
        }

        let state = AppState {
            jwt: Arc::new(JwtVerifier::new(
                &config.auth.jwt_secret,
                config.auth.jwt_audience.clone(),
            )),
            webhooks: Arc::new(webhooks),
            presence: PresenceHub::new(config.presence.typing_ttl),
            store: Arc::new(db),
            processor: Arc::new(stripe),
            config,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweeper = self
            .state
            .presence
            .spawn_sweeper(self.state.config.presence.sweep_interval);

        let app = router(self.state);

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, app).await;
        sweeper.abort();
        result
    }
}
