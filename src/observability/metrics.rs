use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the static `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| async {
            info!("Initializing Metrics ...");
            Metrics::new()
        })
        .await
}

/// Text exposition of everything registered.
pub async fn render() -> String {
    let metrics = get_metrics().await;
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Token cache
    pub token_cache_hits: IntCounterVec,
    pub malformed_persisted_tokens: IntCounterVec,
    pub token_expiry_unix: IntGaugeVec,

    // Token endpoint
    pub token_fetch_requests: IntCounterVec,
    pub token_fetch_failures: IntCounterVec,
    pub token_fetch_duration: HistogramVec,

    // Outbound calls
    pub backend_requests: IntCounterVec,

    // Config
    pub config_validation_errors: IntCounter,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("webservice".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            token_cache_hits: IntCounterVec::new(Opts::new("token_cache_hits_total", "Tokens served without a fetch, by tier"), &["backend", "tier"]).unwrap(),
            malformed_persisted_tokens: IntCounterVec::new(Opts::new("malformed_persisted_tokens_total", "Persisted tokens that failed to parse"), &["backend"]).unwrap(),
            token_expiry_unix: IntGaugeVec::new(Opts::new("token_expiry_unix_seconds", "Expiry of the current token"), &["backend"]).unwrap(),

            token_fetch_requests: IntCounterVec::new(Opts::new("token_fetch_requests_total", "Token endpoint calls by grant"), &["backend", "grant_type"]).unwrap(),
            token_fetch_failures: IntCounterVec::new(Opts::new("token_fetch_failures_total", "Failed token fetches by reason"), &["backend", "reason"]).unwrap(),
            token_fetch_duration: HistogramVec::new(HistogramOpts::new("token_fetch_duration_seconds", "Token fetch duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]), &["backend"]).unwrap(),

            backend_requests: IntCounterVec::new(Opts::new("backend_requests_total", "Outbound calls by method and outcome"), &["backend", "method", "outcome"]).unwrap(),

            config_validation_errors: IntCounter::new("config_validation_errors_total", "Validation errors during config load").unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.token_cache_hits.clone())).unwrap();
        reg.register(Box::new(metrics.malformed_persisted_tokens.clone())).unwrap();
        reg.register(Box::new(metrics.token_expiry_unix.clone())).unwrap();
        reg.register(Box::new(metrics.token_fetch_requests.clone())).unwrap();
        reg.register(Box::new(metrics.token_fetch_failures.clone())).unwrap();
        reg.register(Box::new(metrics.token_fetch_duration.clone())).unwrap();
        reg.register(Box::new(metrics.backend_requests.clone())).unwrap();
        reg.register(Box::new(metrics.config_validation_errors.clone())).unwrap();

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_exposes_registered_families() {
        let metrics = get_metrics().await;
        metrics.token_fetch_requests.with_label_values(&["render_test", "client_credentials"]).inc();
        let text = render().await;
        assert!(text.contains("webservice_token_fetch_requests_total"));
        assert!(text.contains("backend=\"render_test\""));
    }
}
