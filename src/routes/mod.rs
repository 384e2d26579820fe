// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Router assembly, middleware stack, per-route throttles
// - auth.rs: Login, refresh, logout, identity endpoints
// - chat.rs: Document-grounded chat
// - upload.rs: Upload, task status, index stats
// - ops.rs: Admin metrics and runtime snapshot
// - health.rs: Health check
// - extractors.rs: Bearer user, admin user, client address
// - middleware.rs: Request id, metrics, security headers, panic handling
//
// Authenticated handlers run in the same order: extractor (401/403), then the
// per-route throttle (429), then CSRF rotation on mutating routes (403).
//
// ============================================================================

mod auth;
mod chat;
pub mod extractors;
mod health;
pub mod middleware;
mod ops;
mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use extractors::AuthenticatedUser;

pub use auth::{LoginResponse, RefreshTokenResponse};
pub use chat::ChatResponse;
pub use upload::{StatsResponse, UploadResponse, MAX_UPLOAD_BYTES};

const THROTTLE_WINDOW_SECS: i64 = 60;

/// Sliding-window limit of one route, keyed by bucket, user and client address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Throttle {
    bucket: &'static str,
    limit: u32,
}

impl Throttle {
    pub(crate) const fn new(bucket: &'static str, limit: u32) -> Self {
        Self { bucket, limit }
    }

    pub(crate) fn enforce(
        &self,
        app_context: &AppContext,
        user: &AuthenticatedUser,
        client_ip: &str,
    ) -> AppResult<()> {
        app_context.rate_limiter.enforce(
            self.bucket,
            Some(&user.email),
            client_ip,
            self.limit,
            Duration::seconds(THROTTLE_WINDOW_SECS),
        )
    }
}

async fn not_found() -> AppError {
    AppError::not_found("Not found")
}

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        // Authentication
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh_token))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/validate-token", post(auth::validate_token))
        // Chat and documents (CSRF protected)
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/upload",
            post(upload::upload_document)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024)),
        )
        .route("/api/upload/status/:task_id", get(upload::upload_status))
        .route("/api/upload/stats", get(upload::upload_stats))
        // Operations (admin only)
        .route("/api/ops/metrics", get(ops::metrics_snapshot))
        .route("/api/ops/metrics/prometheus", get(ops::metrics_prometheus))
        .route("/api/ops/runtime", get(ops::runtime_snapshot))
        // Health
        .route("/api/health", get(health::health_check))
        .fallback(not_found)
        // Layers listed outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    app_context.clone(),
                    middleware::request_context,
                ))
                .layer(CatchPanicLayer::custom(middleware::handle_panic))
                .into_inner(),
        )
        .with_state(app_context)
}
