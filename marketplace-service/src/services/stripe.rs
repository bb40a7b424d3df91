//! Stripe payment processor client.
//!
//! Covers the slice of the Stripe API the marketplace drives directly:
//! cancelling or un-cancelling subscriptions and opening billing portal
//! sessions. Subscription state changes initiated on Stripe's side arrive
//! through signed webhooks, verified by [`WebhookVerifier`].

use crate::config::StripeConfig;
use crate::services::metrics::record_payment_provider_request;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use marketplace_core::observability::{TracedClientExt, TracedRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a webhook timestamp may lag behind our clock.
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Operations the marketplace performs against the payment processor.
///
/// `request_id` is the inbound request's correlation id, forwarded on the
/// outbound call.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Cancel immediately. The processor ends the subscription now.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription>;

    /// Schedule cancellation at the end of the current period.
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription>;

    /// Clear a scheduled cancellation.
    async fn resume_subscription(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription>;

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
        request_id: Option<&str>,
    ) -> Result<PortalSession>;
}

/// The fields of a Stripe subscription object we mirror locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Unix seconds.
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub customer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
pub struct StripeError {
    pub error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        request: TracedRequest,
    ) -> Result<T> {
        if !self.is_configured() {
            return Err(anyhow!("Stripe credentials not configured"));
        }

        let start = Instant::now();
        let response = match request
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                record_payment_provider_request(operation, "transport_error", start.elapsed().as_secs_f64());
                return Err(anyhow!("Stripe request failed: {}", e));
            }
        };

        let status = response.status();
        let body = response.text().await?;
        record_payment_provider_request(
            operation,
            if status.is_success() { "success" } else { "error" },
            start.elapsed().as_secs_f64(),
        );

        tracing::debug!(status = %status, operation, "Stripe response");

        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            let error: StripeError =
                serde_json::from_str(&body).unwrap_or_else(|_| StripeError {
                    error: StripeErrorDetail {
                        error_type: "unknown".to_string(),
                        code: None,
                        message: body.clone(),
                    },
                });
            tracing::error!(
                status = %status,
                error_type = %error.error.error_type,
                code = ?error.error.code,
                message = %error.error.message,
                operation,
                "Stripe request failed"
            );
            Err(anyhow!(
                "Stripe error ({}): {}",
                error.error.error_type,
                error.error.message
            ))
        }
    }

    async fn set_cancel_at_period_end(
        &self,
        operation: &'static str,
        subscription_id: &str,
        cancel: bool,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription> {
        let url = self.url(&format!("/subscriptions/{}", subscription_id));
        let request = self
            .client
            .traced_post(&url)
            .form(&[("cancel_at_period_end", if cancel { "true" } else { "false" })])
            .request_id(request_id);
        self.execute(operation, request).await
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription> {
        let url = self.url(&format!("/subscriptions/{}", subscription_id));
        let request = self.client.traced_delete(&url).request_id(request_id);
        let subscription: ProcessorSubscription =
            self.execute("cancel_subscription", request).await?;
        tracing::info!(subscription_id = %subscription.id, status = %subscription.status, "Stripe subscription canceled");
        Ok(subscription)
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription> {
        let subscription = self
            .set_cancel_at_period_end("cancel_at_period_end", subscription_id, true, request_id)
            .await?;
        tracing::info!(subscription_id = %subscription.id, "Stripe subscription cancellation scheduled");
        Ok(subscription)
    }

    async fn resume_subscription(
        &self,
        subscription_id: &str,
        request_id: Option<&str>,
    ) -> Result<ProcessorSubscription> {
        let subscription = self
            .set_cancel_at_period_end("resume_subscription", subscription_id, false, request_id)
            .await?;
        tracing::info!(subscription_id = %subscription.id, "Stripe subscription resumed");
        Ok(subscription)
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
        request_id: Option<&str>,
    ) -> Result<PortalSession> {
        let url = self.url("/billing_portal/sessions");
        let request = self
            .client
            .traced_post(&url)
            .form(&[("customer", customer_id), ("return_url", return_url)])
            .request_id(request_id);
        self.execute("create_billing_portal_session", request).await
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// A Stripe event as delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no matching v1 signature")]
    Mismatch,
}

/// Verifies the `Stripe-Signature` header:
/// `t=<unix ts>,v1=<hex HMAC-SHA256("<ts>.<body>", secret)>[,v1=...]`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Secret<String>,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secret.expose_secret().is_empty()
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        if now.abs_diff(timestamp) > self.tolerance_secs {
            return Err(SignatureError::Expired);
        }

        let expected = self.sign(timestamp, payload).ok_or(SignatureError::Mismatch)?;
        if signatures
            .iter()
            .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// HMAC-SHA256 over `"<timestamp>.<payload>"`.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// Build a header value for `payload`, as Stripe would send it.
    pub fn header_for(&self, timestamp: i64, payload: &[u8]) -> Option<String> {
        self.sign(timestamp, payload)
            .map(|sig| format!("t={},v1={}", timestamp, hex::encode(sig)))
    }
}
