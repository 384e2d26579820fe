// ============================================================================
// Operations Routes (admin only)
// ============================================================================
//
// Endpoints:
// - GET /api/ops/metrics - Route metrics snapshot (top 20 routes)
// - GET /api/ops/metrics/prometheus - Prometheus text exposition
// - GET /api/ops/runtime - Mode, totals and live security store counts
//
// ============================================================================

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::extractors::{AdminUser, ClientIp};
use crate::routes::Throttle;

const OPS_METRICS: Throttle = Throttle::new("ops-metrics", 90);
const OPS_RUNTIME: Throttle = Throttle::new("ops-runtime", 120);

const TOP_ROUTES: usize = 20;

/// GET /api/ops/metrics
pub async fn metrics_snapshot(
    State(app_context): State<Arc<AppContext>>,
    AdminUser(user): AdminUser,
    ClientIp(client_ip): ClientIp,
) -> Result<impl IntoResponse, AppError> {
    OPS_METRICS.enforce(&app_context, &user, &client_ip)?;
    Ok(Json(app_context.metrics.snapshot(TOP_ROUTES)))
}

/// GET /api/ops/metrics/prometheus
pub async fn metrics_prometheus(
    State(app_context): State<Arc<AppContext>>,
    AdminUser(user): AdminUser,
    ClientIp(client_ip): ClientIp,
) -> Result<impl IntoResponse, AppError> {
    OPS_METRICS.enforce(&app_context, &user, &client_ip)?;

    let body = app_context.metrics.encode_prometheus()?;
    Ok((
        [(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    ))
}

/// GET /api/ops/runtime
///
/// Runs an unforced maintenance pass first so the counts reflect live entries.
pub async fn runtime_snapshot(
    State(app_context): State<Arc<AppContext>>,
    AdminUser(user): AdminUser,
    ClientIp(client_ip): ClientIp,
) -> Result<impl IntoResponse, AppError> {
    OPS_RUNTIME.enforce(&app_context, &user, &client_ip)?;

    let security = app_context.run_security_maintenance(false);
    Ok(Json(json!({
        "mode": app_context.mode(),
        "metrics": app_context.metrics.totals(),
        "security": security,
    })))
}
