use axum::http::{HeaderMap, HeaderValue};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

tokio::task_local! {
    /// Id of the request currently being served, set by the request-context middleware.
    pub static REQUEST_ID: String;
}

/// Request id of the current task, if it runs inside a request scope.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// `req-` followed by 12 lowercase hex characters.
pub fn new_request_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("req-{}", hex)
}

/// 8 hex characters of `sha256(salt || identity)`; identities never reach the logs raw.
pub fn log_safe_id(identity: &str, salt: &str) -> String {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(identity.as_bytes())
        .finalize();
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Adds the standard security headers to a response
///
/// HSTS is only sent in production posture, where the service sits behind TLS.
pub fn add_security_headers(headers: &mut HeaderMap, is_production: bool) {
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );

    if is_production {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
}

/// Extracts the client address used as the rate-limit origin
///
/// With `trust_proxy_headers` set, checks in order:
/// 1. X-Forwarded-For (first IP in the chain)
/// 2. X-Real-IP
///
/// and otherwise (or when neither parses) falls back to the direct connection
/// address. Forwarded headers are client-controlled unless a reverse proxy
/// overwrites them, so they stay off by default.
pub fn extract_client_ip(
    headers: &HeaderMap,
    direct_ip: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    match direct_ip {
        Some(ip) => ip.to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_have_expected_shape() {
        let id = new_request_id();
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_request_id());
    }

    #[test]
    fn log_safe_id_is_salted_and_short() {
        let a = log_safe_id("user1@company.com", "salt-a");
        let b = log_safe_id("user1@company.com", "salt-b");
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(a, log_safe_id("user1@company.com", "salt-a"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, log_safe_id("user2@company.com", "salt-a"));
    }

    #[test]
    fn forwarded_headers_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let direct: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(extract_client_ip(&headers, Some(direct), false), "127.0.0.1");
        assert_eq!(extract_client_ip(&headers, Some(direct), true), "203.0.113.7");
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn hsts_only_in_production() {
        let mut headers = HeaderMap::new();
        add_security_headers(&mut headers, false);
        assert_eq!(headers["X-Frame-Options"], "DENY");
        assert!(headers.get("Strict-Transport-Security").is_none());

        add_security_headers(&mut headers, true);
        assert!(headers.get("Strict-Transport-Security").is_some());
    }

    #[tokio::test]
    async fn request_id_visible_inside_scope_only() {
        assert!(current_request_id().is_none());
        let seen = REQUEST_ID
            .scope("req-abc".to_string(), async { current_request_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("req-abc"));
    }
}
