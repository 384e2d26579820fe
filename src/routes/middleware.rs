// ============================================================================
// HTTP Middleware
// ============================================================================
//
// - request_context: request id scope, metrics, security headers, logging
// - handle_panic: JSON 500 for handlers that panicked
//
// ============================================================================

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::CACHE_CONTROL, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use crate::context::AppContext;
use crate::error::AppError;
use crate::utils::{add_security_headers, new_request_id, REQUEST_ID};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Incoming X-Request-Id if it is printable and short, otherwise a fresh id.
fn request_id_for(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .filter(|id| id.chars().all(|c| c.is_ascii_graphic()))
        .map(str::to_string)
        .unwrap_or_else(new_request_id)
}

/// Per-request bookkeeping around every route.
///
/// Runs the rest of the stack inside the request id scope so error bodies and
/// log lines can pick the id up, then records the request against its
/// templated route and decorates the response.
pub async fn request_context(
    State(app_context): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = request_id_for(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Incoming request"
    );

    let mut response = REQUEST_ID.scope(request_id.clone(), next.run(request)).await;

    let elapsed = start.elapsed();
    let status = response.status();
    app_context
        .metrics
        .record(method.as_str(), &route, status.as_u16(), elapsed);

    let headers = response.headers_mut();
    add_security_headers(headers, app_context.config.is_production());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if path.starts_with("/api/") {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    tracing::info!(
        request_id = %request_id,
        method = %method,
        route = %route,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );

    response
}

/// Response for a handler that panicked; the payload never reaches the client.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let reason = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %reason, "Handler panicked");
    AppError::internal("handler panicked").into_response()
}
