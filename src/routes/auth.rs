// ============================================================================
// Authentication Routes
// ============================================================================
//
// Endpoints:
// - POST /api/auth/login - Password login, issues access/refresh/csrf tokens
// - POST /api/auth/refresh - New access token from a refresh token
// - POST /api/auth/logout - Revoke a refresh token (idempotent)
// - GET /api/auth/me - Identity of the bearer
// - POST /api/auth/validate-token - Remaining lifetime of the bearer token
//
// ============================================================================

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::extractors::{AuthenticatedUser, ClientIp};
use crate::users::Role;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user_email: String,
    pub user_name: String,
    pub user_role: Role,
    /// Seconds
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_expires_in: i64,
    pub csrf_token: String,
    pub csrf_expires_in: i64,
}

/// Request body for refresh and logout
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// POST /api/auth/login
///
/// The login limiter counts every attempt from the client address,
/// successful or not, before credentials are checked.
pub async fn login(
    State(app_context): State<Arc<AppContext>>,
    ClientIp(client_ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    app_context.rate_limiter.enforce_login(&client_ip)?;

    let email = request.email.trim().to_lowercase();
    let user = match app_context.users.authenticate(&email, &request.password) {
        Some(user) => user,
        None => {
            tracing::warn!(user_hash = %app_context.log_id(&email), "Login failed");
            return Err(AppError::unauthorized("Incorrect email or password"));
        }
    };

    let auth = &app_context.auth_manager;
    let access_token = auth.issue_access_for(user)?;
    let refresh_token = auth.issue_refresh(&user.email)?;
    let csrf_token = app_context.csrf.issue(&user.email);

    tracing::info!(
        user_hash = %app_context.log_id(&user.email),
        role = %user.role,
        "User logged in"
    );

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
        user_email: user.email.clone(),
        user_name: user.name.clone(),
        user_role: user.role,
        expires_in: auth.access_ttl().num_seconds(),
        refresh_token,
        refresh_expires_in: auth.refresh_ttl().num_seconds(),
        csrf_token,
        csrf_expires_in: app_context.config.csrf.ttl().num_seconds(),
    }))
}

/// POST /api/auth/refresh
pub async fn refresh_token(
    State(app_context): State<Arc<AppContext>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth = &app_context.auth_manager;
    let access_token = auth.refresh(&request.refresh_token)?;

    Ok(Json(RefreshTokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: auth.access_ttl().num_seconds(),
    }))
}

/// POST /api/auth/logout
///
/// Unknown or already revoked tokens still log out successfully.
pub async fn logout(
    State(app_context): State<Arc<AppContext>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = app_context.auth_manager.revoke(&request.refresh_token);
    tracing::debug!(revoked = revoked, "Logout");

    Ok(Json(json!({ "message": "Successfully logged out" })))
}

/// GET /api/auth/me
pub async fn me(user: AuthenticatedUser) -> Result<impl IntoResponse, AppError> {
    Ok(Json(json!({
        "email": user.email,
        "name": user.name,
        "role": user.role,
    })))
}

/// POST /api/auth/validate-token
pub async fn validate_token(
    State(app_context): State<Arc<AppContext>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let remaining_seconds = app_context.auth_manager.remaining_seconds(&user.claims);

    Ok(Json(json!({
        "valid": true,
        "remaining_seconds": remaining_seconds,
        "email": user.email,
        "role": user.role,
    })))
}
