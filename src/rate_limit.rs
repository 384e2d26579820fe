//! Sliding-window rate limiting.
//!
//! Each key keeps the timestamps of its accepted requests inside the current
//! window. A request is admitted while fewer than `limit` timestamps remain
//! after pruning; otherwise the caller is told how long until the oldest one
//! leaves the window.
//!
//! Two independent stores back the limiter: API buckets keyed by
//! `bucket|identity|origin`, and login attempts keyed by origin alone.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::SecurityConfig;
use crate::error::{AppError, AppResult};
use crate::store::{BoundedStore, SweepReport};
use crate::utils::log_safe_id;

const ANONYMOUS: &str = "anonymous";

type Window = VecDeque<DateTime<Utc>>;

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole seconds until a retry can succeed; zero when allowed
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }
}

pub struct RateLimiter {
    api: BoundedStore<String, Window>,
    login: BoundedStore<String, Window>,
    login_limit: u32,
    login_window: Duration,
    log_salt: String,
}

impl RateLimiter {
    pub fn new(config: &SecurityConfig, clock: Arc<dyn Clock>, log_salt: impl Into<String>) -> Self {
        Self {
            api: BoundedStore::new("rate_limits", config.api_store(), clock.clone()),
            login: BoundedStore::new("login_attempts", config.login_store(), clock),
            login_limit: config.rate_limit_login,
            login_window: config.login_window(),
            log_salt: log_salt.into(),
        }
    }

    pub fn key(bucket: &str, identity: Option<&str>, origin: &str) -> String {
        let identity = identity
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS);
        format!("{}|{}|{}", bucket, identity, origin)
    }

    /// Admit or reject one request against `bucket`, recording it when admitted.
    pub fn check_and_record(
        &self,
        bucket: &str,
        identity: Option<&str>,
        origin: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let key = Self::key(bucket, identity, origin);
        check_window(&self.api, key, limit, window)
    }

    /// Login throttle, keyed by origin only.
    pub fn check_login_attempt(&self, origin: &str) -> RateLimitDecision {
        check_window(
            &self.login,
            origin.to_string(),
            self.login_limit,
            self.login_window,
        )
    }

    /// [`check_and_record`](Self::check_and_record) as a `Result`.
    pub fn enforce(
        &self,
        bucket: &str,
        identity: Option<&str>,
        origin: &str,
        limit: u32,
        window: Duration,
    ) -> AppResult<()> {
        let decision = self.check_and_record(bucket, identity, origin, limit, window);
        if decision.allowed {
            return Ok(());
        }
        tracing::warn!(
            bucket = bucket,
            user_hash = %log_safe_id(identity.unwrap_or(ANONYMOUS), &self.log_salt),
            retry_after = decision.retry_after_secs,
            "Rate limit exceeded"
        );
        Err(AppError::TooManyRequests {
            retry_after: decision.retry_after_secs,
        })
    }

    pub fn enforce_login(&self, origin: &str) -> AppResult<()> {
        let decision = self.check_login_attempt(origin);
        if decision.allowed {
            return Ok(());
        }
        tracing::warn!(
            origin_hash = %log_safe_id(origin, &self.log_salt),
            retry_after = decision.retry_after_secs,
            "Login rate limit exceeded"
        );
        Err(AppError::TooManyRequests {
            retry_after: decision.retry_after_secs,
        })
    }

    pub fn api_key_count(&self) -> usize {
        self.api.len()
    }

    pub fn login_key_count(&self) -> usize {
        self.login.len()
    }

    /// Sweep both stores; returns (api, login) reports.
    pub fn maintain(&self, force: bool) -> (SweepReport, SweepReport) {
        (self.api.maintain(force), self.login.maintain(force))
    }
}

fn check_window(
    store: &BoundedStore<String, Window>,
    key: String,
    limit: u32,
    window: Duration,
) -> RateLimitDecision {
    store.atomically(|view| {
        let now = view.now();
        let mut hits = view.get(&key).cloned().unwrap_or_default();
        while let Some(oldest) = hits.front() {
            if now - *oldest >= window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= limit as usize {
            let retry_after = match hits.front() {
                Some(oldest) => window - (now - *oldest),
                None => window,
            };
            match hits.back().copied() {
                Some(last) => view.insert_with_expiry(key, hits, last + window),
                None => {
                    view.remove(&key);
                }
            }
            return RateLimitDecision {
                allowed: false,
                retry_after_secs: ceil_secs(retry_after).max(1),
            };
        }

        hits.push_back(now);
        view.insert_with_expiry(key, hits, now + window);
        RateLimitDecision::allow()
    })
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    (millis + 999) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new(&SecurityConfig::default(), clock.clone(), "salt");
        (clock, limiter)
    }

    #[test]
    fn three_then_reject_then_recover() {
        let (clock, limiter) = limiter();
        let window = Duration::seconds(60);
        for _ in 0..3 {
            assert!(limiter
                .check_and_record("chat-post", Some("a@x"), "1.2.3.4", 3, window)
                .allowed);
        }

        let rejected = limiter.check_and_record("chat-post", Some("a@x"), "1.2.3.4", 3, window);
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_secs > 0 && rejected.retry_after_secs <= 60);

        clock.advance(Duration::seconds(61));
        assert!(limiter
            .check_and_record("chat-post", Some("a@x"), "1.2.3.4", 3, window)
            .allowed);
    }

    #[test]
    fn retry_after_counts_down_from_oldest() {
        let (clock, limiter) = limiter();
        let window = Duration::seconds(60);
        assert!(limiter.check_and_record("b", None, "o", 1, window).allowed);
        clock.advance(Duration::milliseconds(20_500));

        let rejected = limiter.check_and_record("b", None, "o", 1, window);
        assert_eq!(rejected.retry_after_secs, 40);
    }

    #[test]
    fn keys_are_independent() {
        let (_clock, limiter) = limiter();
        let window = Duration::seconds(60);
        assert!(limiter.check_and_record("b", Some("a@x"), "o", 1, window).allowed);
        assert!(limiter.check_and_record("b", Some("b@x"), "o", 1, window).allowed);
        assert!(limiter.check_and_record("b", Some("a@x"), "p", 1, window).allowed);
        assert!(limiter.check_and_record("c", Some("a@x"), "o", 1, window).allowed);
        assert!(!limiter.check_and_record("b", Some("a@x"), "o", 1, window).allowed);
        assert_eq!(limiter.api_key_count(), 4);
    }

    #[test]
    fn missing_identity_is_anonymous() {
        assert_eq!(RateLimiter::key("b", None, "o"), "b|anonymous|o");
        assert_eq!(RateLimiter::key("b", Some("  "), "o"), "b|anonymous|o");
        assert_eq!(RateLimiter::key("b", Some("a@x"), "o"), "b|a@x|o");
    }

    #[test]
    fn login_limit_maps_to_too_many_requests() {
        let (_clock, limiter) = limiter();
        for _ in 0..10 {
            assert!(limiter.enforce_login("10.0.0.1").is_ok());
        }
        match limiter.enforce_login("10.0.0.1") {
            Err(AppError::TooManyRequests { retry_after }) => assert!(retry_after >= 1),
            other => panic!("expected throttling, got {:?}", other),
        }
        assert!(limiter.enforce_login("10.0.0.2").is_ok());
        assert_eq!(limiter.login_key_count(), 2);
    }
}
