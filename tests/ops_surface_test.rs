// ============================================================================
// Operations and HTTP Surface Tests
// ============================================================================
//
// - Admin-only ops routes
// - Health, request ids and error bodies
// - Security headers by posture
// - Fail-fast production configuration
//
// ============================================================================

use serde_json::Value;
use serial_test::serial;
use warden::config::{Config, Environment};
use warden::context::AppContext;
use warden::error::AppError;

use test_utils::*;

#[tokio::test]
async fn test_ops_routes_require_admin() {
    let app = spawn_app().await;
    let employee = app.login_session(EMPLOYEE).await;

    for path in [
        "/api/ops/metrics",
        "/api/ops/metrics/prometheus",
        "/api/ops/runtime",
    ] {
        let response = app.get_authed(path, &employee).await;
        assert_eq!(response.status(), 403, "{}", path);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["detail"], "Admin role required");
    }

    let response = app
        .client
        .get(app.url("/api/ops/runtime"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_runtime_snapshot_exposes_security_counts() {
    let app = spawn_app().await;
    app.login_session(EMPLOYEE).await;
    let admin = app.login_session(ADMIN).await;

    let response = app.get_authed("/api/ops/runtime", &admin).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["mode"], "development");
    assert_eq!(body["security"]["csrf_tokens"], 2);
    assert_eq!(body["security"]["refresh_tokens"], 2);
    assert_eq!(body["security"]["login_attempt_keys"], 1);
    assert!(body["metrics"]["requests"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn test_metrics_use_templated_routes() {
    let app = spawn_app().await;
    let admin = app.login_session(ADMIN).await;

    for task_id in ["a", "b", "c"] {
        let response = app
            .get_authed(&format!("/api/upload/status/{}", task_id), &admin)
            .await;
        assert_eq!(response.status(), 404);
    }

    let response = app.get_authed("/api/ops/metrics", &admin).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let routes = body["routes"].as_array().unwrap();
    let status_route = routes
        .iter()
        .find(|r| r["route"] == "GET /api/upload/status/:task_id")
        .expect("templated route recorded");
    assert_eq!(status_route["count"], 3);
    assert_eq!(status_route["errors"], 3);
    assert_eq!(body["totals"]["max_tracked_routes"], 500);

    let response = app
        .get_authed("/api/ops/metrics/prometheus", &admin)
        .await;
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("warden_http_requests_total"));
    assert!(text.contains("route=\"GET /api/upload/status/:task_id\""));
}

#[tokio::test]
async fn test_health_echoes_request_id() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/api/health"))
        .header("X-Request-Id", "trace-abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-request-id"], "trace-abc-123");
    assert_eq!(response.headers()["cache-control"], "no-store");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "development");
    assert_eq!(body["request_id"], "trace-abc-123");

    let response = app.client.get(app.url("/api/health")).send().await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert!(generated.starts_with("req-"));
    assert_eq!(generated.len(), 16);
}

#[tokio::test]
async fn test_unknown_route_has_error_body() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/api/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let request_id = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Not found");
    assert_eq!(body["request_id"], request_id);
}

#[tokio::test]
async fn test_security_headers_in_development() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/api/health")).send().await.unwrap();
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
    assert_eq!(
        headers["referrer-policy"],
        "strict-origin-when-cross-origin"
    );
    assert!(headers.get("permissions-policy").is_some());
    assert!(headers.get("strict-transport-security").is_none());
}

#[tokio::test]
async fn test_hsts_in_production() {
    let mut config = Config::development();
    config.environment = Environment::Production;
    config.jwt.secret = "integration-test-production-secret".to_string();
    let app = spawn_app_with(config).await;

    let response = app.client.get(app.url("/api/health")).send().await.unwrap();
    assert_eq!(
        response.headers()["strict-transport-security"],
        "max-age=31536000; includeSubDomains"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["mode"], "production");
}

#[tokio::test]
#[serial]
async fn test_production_env_with_default_secret_refuses_to_start() {
    std::env::set_var("ENVIRONMENT", "production");
    std::env::remove_var("JWT_SECRET");

    let config = Config::from_env().unwrap();
    let result = AppContext::with_defaults(config);

    std::env::remove_var("ENVIRONMENT");
    assert!(matches!(result, Err(AppError::BadConfiguration(_))));
}

#[tokio::test]
#[serial]
async fn test_env_overrides_limits() {
    std::env::set_var("RATE_LIMIT_LOGIN", "2");
    std::env::set_var("TASK_TTL_MINUTES", "1");

    let config = Config::from_env().unwrap();

    std::env::remove_var("RATE_LIMIT_LOGIN");
    std::env::remove_var("TASK_TTL_MINUTES");
    assert_eq!(config.security.rate_limit_login, 2);
    assert_eq!(config.tasks.ttl().num_minutes(), 5);

    let app = spawn_app_with(config).await;
    for _ in 0..2 {
        assert_eq!(app.login(("nobody@company.com", "x")).await.status(), 401);
    }
    assert_eq!(app.login(EMPLOYEE).await.status(), 429);
}
