//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. Marketplace gauges (users, sites and orders by status,
//! escrow, fee revenue) are refreshed on each `/metrics` scrape; see the
//! handler in `lib.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    users_total: GaugeVec,
    sites_total: GaugeVec,
    orders_total: GaugeVec,
    escrow_cents: Gauge,
    fee_revenue_cents: Gauge,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

impl ApiMetrics {
    /// Create a metrics instance with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("linkex_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "linkex_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new("linkex_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )?;
        let users_total = GaugeVec::new(
            Opts::new("linkex_users_total", "Registered users by role"),
            &["role"],
        )?;
        let sites_total = GaugeVec::new(
            Opts::new("linkex_sites_total", "Sites by moderation status"),
            &["status"],
        )?;
        let orders_total = GaugeVec::new(
            Opts::new("linkex_orders_total", "Orders by status"),
            &["status"],
        )?;
        let escrow_cents = Gauge::new("linkex_escrow_cents", "Funds currently held in escrow")?;
        let fee_revenue_cents =
            Gauge::new("linkex_fee_revenue_cents", "Lifetime platform fee revenue")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        registry.register(Box::new(users_total.clone()))?;
        registry.register(Box::new(sites_total.clone()))?;
        registry.register(Box::new(orders_total.clone()))?;
        registry.register(Box::new(escrow_cents.clone()))?;
        registry.register(Box::new(fee_revenue_cents.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                users_total,
                sites_total,
                orders_total,
                escrow_cents,
                fee_revenue_cents,
            }),
        })
    }

    /// Total request count across all labels.
    pub fn requests(&self) -> u64 {
        sum_counter(&self.inner.http_requests_total)
    }

    /// Total error count across all labels.
    pub fn errors(&self) -> u64 {
        sum_counter(&self.inner.http_errors_total)
    }

    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    /// Users gauge, labelled by role.
    pub fn users_total(&self) -> &GaugeVec {
        &self.inner.users_total
    }

    /// Sites gauge, labelled by status.
    pub fn sites_total(&self) -> &GaugeVec {
        &self.inner.sites_total
    }

    /// Orders gauge, labelled by status.
    pub fn orders_total(&self) -> &GaugeVec {
        &self.inner.orders_total
    }

    /// Escrow gauge.
    pub fn escrow_cents(&self) -> &Gauge {
        &self.inner.escrow_cents
    }

    /// Fee revenue gauge.
    pub fn fee_revenue_cents(&self) -> &Gauge {
        &self.inner.fee_revenue_cents
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer)
            .map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

fn sum_counter(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

/// Replace UUID path segments with `{id}` so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record_request(
            &method,
            &path,
            response.status().as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let m = ApiMetrics::new().unwrap();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.errors(), 0);
    }

    #[test]
    fn errors_counted_separately() {
        let m = ApiMetrics::new().unwrap();
        m.record_request("GET", "/v1/listings", 200, 0.01);
        m.record_request("POST", "/v1/orders", 402, 0.02);
        m.record_request("GET", "/v1/orders/{id}", 500, 0.03);
        assert_eq!(m.requests(), 3);
        assert_eq!(m.errors(), 2);
    }

    #[test]
    fn uuid_segments_are_normalized() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            normalize_path(&format!("/v1/orders/{id}/accept")),
            "/v1/orders/{id}/accept"
        );
        assert_eq!(normalize_path("/v1/listings"), "/v1/listings");
    }

    #[test]
    fn encode_includes_metric_names() {
        let m = ApiMetrics::new().unwrap();
        m.record_request("GET", "/health/liveness", 200, 0.001);
        m.escrow_cents().set(1234.0);
        let text = m.gather_and_encode().unwrap();
        assert!(text.contains("linkex_http_requests_total"));
        assert!(text.contains("linkex_escrow_cents 1234"));
    }
}
