use prometheus::{Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Global metrics for ledgerlink
pub struct Metrics {
    pub registry: Registry,

    // Inbound HTTP
    pub requests_total: CounterVec,

    // Outbound QuickBooks calls
    pub remote_duration_seconds: HistogramVec,
    pub rate_limited_total: Counter,

    // Credential lifecycle
    pub token_refreshes_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("ledgerlink_requests_total", "Total number of HTTP requests"),
            &["endpoint", "status"],
        )?;

        let remote_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ledgerlink_remote_duration_seconds",
                "QuickBooks API call duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["operation"], // token, query_accounts
        )?;

        let rate_limited_total = Counter::new(
            "ledgerlink_rate_limited_total",
            "Total number of 429 responses received from QuickBooks",
        )?;

        let token_refreshes_total = CounterVec::new(
            Opts::new(
                "ledgerlink_token_refreshes_total",
                "Total number of access token refreshes",
            ),
            &["outcome"], // success, failure
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(remote_duration_seconds.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(token_refreshes_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            remote_duration_seconds,
            rate_limited_total,
            token_refreshes_total,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
