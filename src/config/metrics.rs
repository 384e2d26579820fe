// ============================================================================
// Route Metrics Configuration
// ============================================================================

use super::env_or;

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Distinct route keys tracked, overflow bucket included (floored at one)
    pub max_routes: usize,
    /// Length of the per-route recent latency ring
    pub recent_latency_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_routes: 500,
            recent_latency_samples: 400,
        }
    }
}

impl MetricsConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_routes: env_or("METRICS_MAX_ROUTES", defaults.max_routes).max(1),
            recent_latency_samples: env_or(
                "METRICS_RECENT_LATENCY_SAMPLES",
                defaults.recent_latency_samples,
            )
            .max(1),
        }
    }
}
