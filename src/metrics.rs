use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::MetricsConfig;

/// Route key every request collapses into once the route ceiling is reached
pub const OVERFLOW_ROUTE: &str = "* /__overflow__";

#[derive(Debug, Default)]
struct RouteMetric {
    count: u64,
    errors: u64,
    total_latency_ms: u64,
    recent_latency_ms: VecDeque<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    total_requests: u64,
    total_errors: u64,
    overflow_requests: u64,
    routes: HashMap<String, RouteMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsTotals {
    pub uptime_seconds: i64,
    pub requests: u64,
    pub errors: u64,
    /// Percent, two decimals
    pub error_rate: f64,
    pub routes: usize,
    pub route_overflow_requests: u64,
    pub max_tracked_routes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub route: String,
    pub count: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub p95_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub totals: MetricsTotals,
    pub routes: Vec<RouteSummary>,
}

/// Per-route request counters with a hard ceiling on distinct routes.
///
/// The JSON snapshot and the Prometheus exposition are fed by the same
/// `record` call and use the same capped route keys.
pub struct RouteMetrics {
    inner: Mutex<Inner>,
    max_routes: usize,
    recent_samples: usize,
    started_at: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl RouteMetrics {
    pub fn new(config: &MetricsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("warden_http_requests_total", "Total HTTP requests by route"),
            &["route", "status_class"],
        )
        .context("Failed to create request counter")?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "warden_http_request_duration_seconds",
                "Histogram of HTTP request latencies",
            ),
            &["route"],
        )
        .context("Failed to create latency histogram")?;

        registry
            .register(Box::new(requests_total.clone()))
            .context("Failed to register request counter")?;
        registry
            .register(Box::new(request_duration.clone()))
            .context("Failed to register latency histogram")?;

        let started_at = clock.now();
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            max_routes: config.max_routes.max(1),
            recent_samples: config.recent_latency_samples.max(1),
            started_at: Mutex::new(started_at),
            clock,
            registry,
            requests_total,
            request_duration,
        })
    }

    pub fn max_routes(&self) -> usize {
        self.max_routes
    }

    /// Record one completed request against `METHOD path`.
    pub fn record(&self, method: &str, path: &str, status: u16, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        let is_error = status >= 400;

        let route_key = {
            let mut inner = self.inner.lock();
            let (route_key, overflowed) = self.resolve_route_key(&inner, method, path);
            if overflowed {
                inner.overflow_requests += 1;
            }
            inner.total_requests += 1;
            if is_error {
                inner.total_errors += 1;
            }

            let recent_samples = self.recent_samples;
            let route = inner.routes.entry(route_key.clone()).or_default();
            route.count += 1;
            if is_error {
                route.errors += 1;
            }
            route.total_latency_ms += latency_ms;
            route.recent_latency_ms.push_back(latency_ms);
            while route.recent_latency_ms.len() > recent_samples {
                route.recent_latency_ms.pop_front();
            }
            route_key
        };

        let status_class = format!("{}xx", status / 100);
        self.requests_total
            .with_label_values(&[route_key.as_str(), status_class.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[route_key.as_str()])
            .observe(latency.as_secs_f64());
    }

    fn resolve_route_key(&self, inner: &Inner, method: &str, path: &str) -> (String, bool) {
        let route_key = format!("{} {}", method.to_uppercase(), path);
        if inner.routes.contains_key(&route_key) {
            return (route_key, false);
        }
        // One slot stays reserved for the overflow bucket.
        if inner.routes.len() < self.max_routes.saturating_sub(1) {
            return (route_key, false);
        }
        (OVERFLOW_ROUTE.to_string(), true)
    }

    pub fn totals(&self) -> MetricsTotals {
        let inner = self.inner.lock();
        self.totals_locked(&inner)
    }

    fn totals_locked(&self, inner: &Inner) -> MetricsTotals {
        let uptime = (self.clock.now() - *self.started_at.lock()).num_seconds().max(0);
        MetricsTotals {
            uptime_seconds: uptime,
            requests: inner.total_requests,
            errors: inner.total_errors,
            error_rate: percent(inner.total_errors, inner.total_requests),
            routes: inner.routes.len(),
            route_overflow_requests: inner.overflow_requests,
            max_tracked_routes: self.max_routes,
        }
    }

    /// Totals plus the `top_n` busiest routes (at least one).
    pub fn snapshot(&self, top_n: usize) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let totals = self.totals_locked(&inner);

        let mut routes: Vec<RouteSummary> = inner
            .routes
            .iter()
            .map(|(route, metric)| {
                let samples: Vec<u64> = metric.recent_latency_ms.iter().copied().collect();
                RouteSummary {
                    route: route.clone(),
                    count: metric.count,
                    errors: metric.errors,
                    error_rate: percent(metric.errors, metric.count),
                    avg_latency_ms: if metric.count > 0 {
                        metric.total_latency_ms / metric.count
                    } else {
                        0
                    },
                    p95_latency_ms: p95(samples),
                }
            })
            .collect();

        routes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.route.cmp(&b.route)));
        routes.truncate(top_n.max(1));
        MetricsSnapshot { totals, routes }
    }

    /// Forget every observation and restart the uptime clock.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
        *self.started_at.lock() = self.clock.now();
        self.requests_total.reset();
        self.request_duration.reset();
    }

    /// Prometheus text exposition of this collector's registry.
    pub fn encode_prometheus(&self) -> Result<String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let raw = part as f64 / whole as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Nearest-rank p95 over the given samples.
fn p95(mut values: Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let idx = ((values.len() - 1) as f64 * 0.95).round() as usize;
    values[idx.min(values.len() - 1)]
}
