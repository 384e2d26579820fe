// ============================================================================
// Authentication Flow Tests
// ============================================================================
//
// - Login issues access, refresh and CSRF tokens with their lifetimes
// - Refresh, logout and revocation
// - Bearer extraction failures
// - Login limiter
//
// ============================================================================

use serde_json::{json, Value};

use test_utils::*;

#[tokio::test]
async fn test_login_issues_all_tokens() {
    let app = spawn_app().await;

    let response = app.login(EMPLOYEE).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["user_email"], "user1@company.com");
    assert_eq!(body["user_role"], "employee");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["refresh_expires_in"], 24 * 3600);
    assert_eq!(body["csrf_expires_in"], 30 * 60);
    assert_eq!(body["csrf_token"].as_str().unwrap().len(), 43);
    assert!(body["access_token"].as_str().unwrap().split('.').count() == 3);

    let snapshot = app.context.security_snapshot();
    assert_eq!(snapshot.refresh_tokens, 1);
    assert_eq!(snapshot.csrf_tokens, 1);
}

#[tokio::test]
async fn test_wrong_password_is_401_with_error_body() {
    let app = spawn_app().await;

    let response = app.login(("user1@company.com", "wrong")).await;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Incorrect email or password");
    assert!(body["request_id"].as_str().unwrap().starts_with("req-"));
}

#[tokio::test]
async fn test_me_and_validate_token() {
    let app = spawn_app().await;
    let session = app.login_session(MANAGER).await;

    let response = app.get_authed("/api/auth/me", &session).await;
    assert_eq!(response.status(), 200);
    let me: Value = response.json().await.unwrap();
    assert_eq!(
        me,
        json!({ "email": "user2@company.com", "name": "Morgan Lee", "role": "manager" })
    );

    let response = app
        .client
        .post(app.url("/api/auth/validate-token"))
        .bearer_auth(&session.access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], true);
    let remaining = body["remaining_seconds"].as_i64().unwrap();
    assert!(remaining > 3500 && remaining <= 3600);
}

#[tokio::test]
async fn test_missing_or_bad_bearer_is_401() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/api/auth/me")).send().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].is_string());
    assert!(body["request_id"].is_string());

    let response = app
        .client
        .get(app.url("/api/auth/me"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Invalid token");
}

#[tokio::test]
async fn test_bearer_scheme_is_case_insensitive() {
    let app = spawn_app().await;
    let session = app.login_session(EMPLOYEE).await;

    for scheme in ["bearer", "BEARER"] {
        let response = app
            .client
            .get(app.url("/api/auth/me"))
            .header("authorization", format!("{} {}", scheme, session.access_token))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{}", scheme);
    }
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = spawn_app().await;
    let session = app.login_session(EMPLOYEE).await;

    let response = app
        .client
        .get(app.url("/api/auth/me"))
        .bearer_auth(&session.refresh_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_refresh_then_logout() {
    let app = spawn_app().await;
    let session = app.login_session(EMPLOYEE).await;

    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refresh_token": session.refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 3600);

    let new_session = Session {
        access_token: body["access_token"].as_str().unwrap().to_string(),
        ..session.clone()
    };
    let response = app.get_authed("/api/auth/me", &new_session).await;
    assert_eq!(response.status(), 200);

    for _ in 0..2 {
        let response = app
            .client
            .post(app.url("/api/auth/logout"))
            .json(&json!({ "refresh_token": session.refresh_token }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refresh_token": session.refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.context.security_snapshot().refresh_tokens, 0);
}

#[tokio::test]
async fn test_refresh_with_access_token_is_401() {
    let app = spawn_app().await;
    let session = app.login_session(EMPLOYEE).await;

    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refresh_token": session.access_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_login_limiter_returns_retry_after() {
    let app = spawn_app().await;
    let limit = app.context.config.security.rate_limit_login;

    for _ in 0..limit {
        let response = app.login(("user1@company.com", "wrong")).await;
        assert_eq!(response.status(), 401);
    }

    // Correct credentials are throttled too once the window is full.
    let response = app.login(EMPLOYEE).await;
    assert_eq!(response.status(), 429);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Too many requests");
}
