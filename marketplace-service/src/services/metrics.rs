//! Metrics module for marketplace-service.
//! Provides Prometheus metrics for fee calculation, subscriptions and presence.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "marketplace_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Fee calculations, labelled by where each rate came from.
pub static FEE_CALCULATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription operations counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment processor calls
pub static PAYMENT_PROVIDER_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment processor call duration
pub static PAYMENT_PROVIDER_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Processor webhook events by type and outcome
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Presence mutations by kind
pub static PRESENCE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    FEE_CALCULATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "marketplace_fee_calculations_total",
                "Total fee calculations by supplier and buyer rate source"
            ),
            &["supplier_rate_source", "buyer_rate_source"]
        )
        .expect("Failed to register FEE_CALCULATIONS_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "marketplace_subscription_operations_total",
                "Total subscription operations by operation and status"
            ),
            &["operation", "status"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    PAYMENT_PROVIDER_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "marketplace_payment_provider_requests_total",
                "Total payment processor requests"
            ),
            &["operation", "status"]
        )
        .expect("Failed to register PAYMENT_PROVIDER_REQUESTS_TOTAL")
    });

    PAYMENT_PROVIDER_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "marketplace_payment_provider_request_duration_seconds",
                "Payment processor request duration",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["operation"]
        )
        .expect("Failed to register PAYMENT_PROVIDER_REQUEST_DURATION")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "marketplace_webhook_events_total",
                "Processor webhook events by type and outcome"
            ),
            &["event_type", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    PRESENCE_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "marketplace_presence_events_total",
                "Presence mutations by kind"
            ),
            &["kind"]
        )
        .expect("Failed to register PRESENCE_EVENTS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Domain metrics from the prometheus registry followed by the HTTP
/// request metrics of the core recorder.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();
    output.push_str(&marketplace_core::middleware::render_recorder());
    output
}

/// Record a fee calculation.
pub fn record_fee_calculation(supplier_rate_source: &str, buyer_rate_source: &str) {
    if let Some(counter) = FEE_CALCULATIONS_TOTAL.get() {
        counter
            .with_label_values(&[supplier_rate_source, buyer_rate_source])
            .inc();
    }
}

/// Record a subscription operation.
pub fn record_subscription_operation(operation: &str, status: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation, status]).inc();
    }
}

/// Record a payment processor call and its duration.
pub fn record_payment_provider_request(operation: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = PAYMENT_PROVIDER_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[operation, status]).inc();
    }
    if let Some(histogram) = PAYMENT_PROVIDER_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

/// Record a processor webhook event.
pub fn record_webhook_event(event_type: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, outcome]).inc();
    }
}

/// Record a presence mutation.
pub fn record_presence_event(kind: &str) {
    if let Some(counter) = PRESENCE_EVENTS_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}
