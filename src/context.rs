use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::clock::Clock;
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::csrf::CsrfRotator;
use crate::error::{AppError, AppResult};
use crate::metrics::RouteMetrics;
use crate::rate_limit::RateLimiter;
use crate::tasks::TaskTracker;
use crate::users::UserDirectory;
use crate::utils::log_safe_id;

/// Live entry counts of the security stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub csrf_tokens: usize,
    pub refresh_tokens: usize,
    pub login_attempt_keys: usize,
    pub rate_limit_keys: usize,
    pub tasks: usize,
}

/// Application context containing shared dependencies
///
/// Every store is owned here and reaches handlers through axum state.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub users: Arc<UserDirectory>,
    pub auth_manager: Arc<AuthManager>,
    pub csrf: Arc<CsrfRotator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tasks: Arc<TaskTracker>,
    pub metrics: Arc<RouteMetrics>,
    pub collaborators: Collaborators,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Validates `config` and builds every component from it.
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        users: UserDirectory,
        collaborators: Collaborators,
    ) -> AppResult<Self> {
        config.validate()?;

        let users = Arc::new(users);
        let salt = config.logging.hash_salt.clone();
        let auth_manager = AuthManager::new(&config, users.clone(), clock.clone())?;
        let csrf = CsrfRotator::new(
            config.csrf.store(&config.security),
            clock.clone(),
            salt.clone(),
        );
        let rate_limiter = RateLimiter::new(&config.security, clock.clone(), salt);
        let tasks = TaskTracker::new(&config.tasks, clock.clone());
        let metrics = RouteMetrics::new(&config.metrics, clock.clone()).map_err(AppError::Unknown)?;

        Ok(Self {
            started_at: clock.now(),
            config: Arc::new(config),
            clock,
            users,
            auth_manager: Arc::new(auth_manager),
            csrf: Arc::new(csrf),
            rate_limiter: Arc::new(rate_limiter),
            tasks: Arc::new(tasks),
            metrics: Arc::new(metrics),
            collaborators,
        })
    }

    /// Demo users, demo collaborators, wall-clock time.
    pub fn with_defaults(config: Config) -> AppResult<Self> {
        Self::new(
            config,
            Arc::new(crate::clock::SystemClock),
            UserDirectory::demo(),
            Collaborators::demo(),
        )
    }

    pub fn mode(&self) -> &'static str {
        self.config.environment.as_str()
    }

    pub fn uptime_seconds(&self) -> i64 {
        (self.clock.now() - self.started_at).num_seconds().max(0)
    }

    /// Salted hash of an identity, for log fields.
    pub fn log_id(&self, identity: &str) -> String {
        log_safe_id(identity, &self.config.logging.hash_salt)
    }

    pub fn security_snapshot(&self) -> SecuritySnapshot {
        SecuritySnapshot {
            csrf_tokens: self.csrf.len(),
            refresh_tokens: self.auth_manager.refresh_token_count(),
            login_attempt_keys: self.rate_limiter.login_key_count(),
            rate_limit_keys: self.rate_limiter.api_key_count(),
            tasks: self.tasks.len(),
        }
    }

    /// Sweep every security store and report what is left.
    pub fn run_security_maintenance(&self, force: bool) -> SecuritySnapshot {
        let refresh = self.auth_manager.maintain(force);
        let csrf = self.csrf.maintain(force);
        let (api, login) = self.rate_limiter.maintain(force);
        let tasks = self.tasks.maintain(force);

        let removed = [refresh, csrf, api, login, tasks]
            .iter()
            .map(|report| report.expired + report.evicted)
            .sum::<usize>();
        if removed > 0 {
            tracing::info!(removed = removed, forced = force, "Security maintenance swept stores");
        }
        self.security_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn context() -> (Arc<ManualClock>, AppContext) {
        let clock = Arc::new(ManualClock::starting_now());
        let ctx = AppContext::new(
            Config::development(),
            clock.clone(),
            UserDirectory::demo(),
            Collaborators::demo(),
        )
        .unwrap();
        (clock, ctx)
    }

    #[test]
    fn snapshot_counts_live_entries() {
        let (_clock, ctx) = context();
        ctx.csrf.issue("user1@company.com");
        ctx.auth_manager.issue_refresh("user1@company.com").unwrap();
        ctx.rate_limiter.enforce_login("127.0.0.1").unwrap();
        ctx.tasks.create("t1", "user1@company.com");

        let snapshot = ctx.security_snapshot();
        assert_eq!(snapshot.csrf_tokens, 1);
        assert_eq!(snapshot.refresh_tokens, 1);
        assert_eq!(snapshot.login_attempt_keys, 1);
        assert_eq!(snapshot.rate_limit_keys, 0);
        assert_eq!(snapshot.tasks, 1);
    }

    #[test]
    fn forced_maintenance_drops_expired_entries() {
        let (clock, ctx) = context();
        ctx.csrf.issue("user1@company.com");
        ctx.rate_limiter.enforce_login("127.0.0.1").unwrap();
        clock.advance(Duration::hours(2));

        let snapshot = ctx.run_security_maintenance(true);
        assert_eq!(snapshot.csrf_tokens, 0);
        assert_eq!(snapshot.login_attempt_keys, 0);
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = Config::development();
        config.environment = crate::config::Environment::Production;
        let result = AppContext::new(
            config,
            Arc::new(ManualClock::starting_now()),
            UserDirectory::demo(),
            Collaborators::demo(),
        );
        assert!(matches!(result, Err(AppError::BadConfiguration(_))));
    }
}
