// ============================================================================
// Health Route
// ============================================================================
//
// Endpoints:
// - GET /api/health - Liveness with mode, uptime and request totals
//
// ============================================================================

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::utils::current_request_id;

/// GET /api/health
pub async fn health_check(
    State(app_context): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    let totals = app_context.metrics.totals();

    Ok(Json(json!({
        "status": "ok",
        "mode": app_context.mode(),
        "uptime_seconds": app_context.uptime_seconds(),
        "requests_total": totals.requests,
        "errors_total": totals.errors,
        "error_rate": totals.error_rate,
        "request_id": current_request_id(),
    })))
}
