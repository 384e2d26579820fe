// ============================================================================
// CSRF Protection
// ============================================================================
//
// Single-use anti-forgery tokens bound to a user:
// - issued at login, 32 random bytes, URL-safe base64
// - every successful verification consumes the token and mints its
//   replacement inside the same store critical section
// - once a replacement exists, every response of that request carries it in
//   X-CSRF-Token, errors included, so the client never loses its token
//
// ============================================================================

use axum::{
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::store::{BoundedStore, StoreConfig, SweepReport};
use crate::utils::log_safe_id;

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone)]
pub struct CsrfRecord {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

pub struct CsrfRotator {
    tokens: BoundedStore<String, CsrfRecord>,
    log_salt: String,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl CsrfRotator {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>, log_salt: impl Into<String>) -> Self {
        Self {
            tokens: BoundedStore::new("csrf_tokens", config, clock),
            log_salt: log_salt.into(),
        }
    }

    /// Mint a fresh token for `identity`.
    pub fn issue(&self, identity: &str) -> String {
        let token = generate_token();
        self.tokens.atomically(|view| {
            let now = view.now();
            let record = CsrfRecord {
                identity: identity.to_string(),
                expires_at: now + self.tokens.config().ttl,
                issued_at: now,
            };
            view.insert(token.clone(), record);
        });
        token
    }

    /// Consume `token` and return its replacement.
    ///
    /// A token bound to another user is rejected but left in place; an
    /// expired one is removed as it is rejected.
    pub fn verify_and_rotate(&self, token: &str, identity: &str) -> AppResult<String> {
        let key = token.to_string();
        let ttl = self.tokens.config().ttl;

        let outcome = self.tokens.atomically(|view| {
            let now = view.now();
            let (expired, owner_matches) = match view.entry(&key) {
                Some(entry) => (entry.is_expired(now), entry.value.identity == identity),
                None => return Err(AppError::forbidden("Invalid CSRF token")),
            };
            if expired {
                view.remove(&key);
                return Err(AppError::forbidden("CSRF token expired"));
            }
            if !owner_matches {
                return Err(AppError::forbidden("CSRF token does not match user"));
            }

            view.remove(&key);
            let next = generate_token();
            view.insert(
                next.clone(),
                CsrfRecord {
                    identity: identity.to_string(),
                    expires_at: now + ttl,
                    issued_at: now,
                },
            );
            Ok(next)
        });

        if let Err(e) = &outcome {
            tracing::warn!(
                user_hash = %log_safe_id(identity, &self.log_salt),
                error = %e,
                "CSRF verification failed"
            );
        }
        outcome
    }

    /// Read `X-CSRF-Token` and rotate it.
    pub fn rotate_from_headers(&self, headers: &HeaderMap, identity: &str) -> AppResult<RotatedCsrf> {
        let token = headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::forbidden("CSRF token required"))?;

        let next_token = self.verify_and_rotate(token, identity)?;
        Ok(RotatedCsrf { next_token })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn maintain(&self, force: bool) -> SweepReport {
        self.tokens.maintain(force)
    }
}

/// Replacement token minted for the current request
#[derive(Debug, Clone)]
pub struct RotatedCsrf {
    next_token: String,
}

impl RotatedCsrf {
    pub fn token(&self) -> &str {
        &self.next_token
    }

    /// Turn the handler outcome into a response carrying the replacement token,
    /// whether it succeeded or not.
    pub fn respond<T: IntoResponse>(self, result: AppResult<T>) -> Response {
        let mut response = match result {
            Ok(body) => body.into_response(),
            Err(e) => e.into_response(),
        };
        match HeaderValue::from_str(&self.next_token) {
            Ok(value) => {
                response.headers_mut().insert(CSRF_HEADER, value);
            }
            Err(e) => {
                tracing::error!(error = %e, "Rotated CSRF token is not a valid header value");
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::StatusCode;
    use chrono::Duration;

    fn rotator() -> (Arc<ManualClock>, CsrfRotator) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = StoreConfig::new(100, Duration::minutes(30), Duration::seconds(30));
        (clock.clone(), CsrfRotator::new(config, clock, "salt"))
    }

    #[test]
    fn token_is_single_use() {
        let (_clock, csrf) = rotator();
        let first = csrf.issue("user1@company.com");
        assert_eq!(first.len(), 43);

        let second = csrf.verify_and_rotate(&first, "user1@company.com").unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            csrf.verify_and_rotate(&first, "user1@company.com"),
            Err(AppError::Forbidden(_))
        ));
        assert!(csrf.verify_and_rotate(&second, "user1@company.com").is_ok());
        assert_eq!(csrf.len(), 1);
    }

    #[test]
    fn wrong_user_is_rejected_without_consuming() {
        let (_clock, csrf) = rotator();
        let token = csrf.issue("user1@company.com");
        assert!(matches!(
            csrf.verify_and_rotate(&token, "user2@company.com"),
            Err(AppError::Forbidden(_))
        ));
        assert!(csrf.verify_and_rotate(&token, "user1@company.com").is_ok());
    }

    #[test]
    fn expired_token_is_rejected_and_removed() {
        let (clock, csrf) = rotator();
        let token = csrf.issue("user1@company.com");
        clock.advance(Duration::minutes(31));
        assert!(matches!(
            csrf.verify_and_rotate(&token, "user1@company.com"),
            Err(AppError::Forbidden(_))
        ));
        assert!(csrf.is_empty());
    }

    #[test]
    fn missing_header_is_forbidden() {
        let (_clock, csrf) = rotator();
        let err = csrf
            .rotate_from_headers(&HeaderMap::new(), "user1@company.com")
            .unwrap_err();
        assert_eq!(err.user_message(), "CSRF token required");
    }

    #[test]
    fn replacement_rides_on_error_responses() {
        let (_clock, csrf) = rotator();
        let token = csrf.issue("user1@company.com");
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER, HeaderValue::from_str(&token).unwrap());

        let rotated = csrf.rotate_from_headers(&headers, "user1@company.com").unwrap();
        let next = rotated.token().to_string();
        let response = rotated.respond::<()>(Err(AppError::validation("bad input")));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CSRF_HEADER], next.as_str());
    }
}
