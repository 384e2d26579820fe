// ============================================================================
// Security Configuration
// ============================================================================
// Session credentials, anti-forgery tokens and rate limiting.

use chrono::Duration;

use super::{bounded_seconds, check_lifetime, env_or};
use crate::error::AppError;
use crate::store::StoreConfig;

/// Development signing secret; refused in production posture.
pub const DEFAULT_JWT_SECRET: &str = "dev-secret-key-change-in-prod";

#[derive(Clone, Debug)]
pub struct JwtConfig {
    /// HS256 signing secret
    pub secret: String,
    /// Access credential lifetime in hours (fractions allowed)
    pub access_expire_hours: f64,
    /// Refresh credential lifetime in hours (fractions allowed)
    pub refresh_expire_hours: f64,
    /// Ceiling on recorded refresh credentials
    pub max_refresh_tokens: usize,
    /// Sweep spacing for the refresh store
    pub maintenance_interval_secs: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_JWT_SECRET.to_string(),
            access_expire_hours: 1.0,
            refresh_expire_hours: 24.0,
            max_refresh_tokens: 10_000,
            maintenance_interval_secs: 30,
        }
    }
}

impl JwtConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret: std::env::var("JWT_SECRET").unwrap_or(defaults.secret),
            access_expire_hours: env_or("JWT_EXPIRE_HOURS", defaults.access_expire_hours),
            refresh_expire_hours: env_or(
                "JWT_REFRESH_EXPIRE_HOURS",
                defaults.refresh_expire_hours,
            ),
            max_refresh_tokens: env_or("MAX_REFRESH_TOKENS", defaults.max_refresh_tokens),
            maintenance_interval_secs: env_or(
                "SECURITY_MAINTENANCE_INTERVAL_SECONDS",
                defaults.maintenance_interval_secs,
            ),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        hours_to_duration(self.access_expire_hours)
    }

    pub fn refresh_ttl(&self) -> Duration {
        hours_to_duration(self.refresh_expire_hours)
    }

    pub fn refresh_store(&self) -> StoreConfig {
        StoreConfig::new(
            self.max_refresh_tokens,
            self.refresh_ttl(),
            bounded_seconds(self.maintenance_interval_secs as f64),
        )
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.secret.is_empty() {
            return Err(AppError::bad_configuration("JWT_SECRET must not be empty"));
        }
        check_lifetime("JWT_EXPIRE_HOURS", self.access_expire_hours * 3600.0)?;
        check_lifetime("JWT_REFRESH_EXPIRE_HOURS", self.refresh_expire_hours * 3600.0)
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    bounded_seconds(hours * 3600.0)
}

#[derive(Clone, Debug)]
pub struct CsrfConfig {
    pub token_expire_minutes: i64,
    pub max_tokens: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_expire_minutes: 30,
            max_tokens: 10_000,
        }
    }
}

impl CsrfConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_expire_minutes: env_or(
                "CSRF_TOKEN_EXPIRE_MINUTES",
                defaults.token_expire_minutes,
            ),
            max_tokens: env_or("MAX_CSRF_TOKENS", defaults.max_tokens),
        }
    }

    pub fn ttl(&self) -> Duration {
        bounded_seconds(self.token_expire_minutes as f64 * 60.0)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        check_lifetime(
            "CSRF_TOKEN_EXPIRE_MINUTES",
            self.token_expire_minutes as f64 * 60.0,
        )
    }

    pub fn store(&self, security: &SecurityConfig) -> StoreConfig {
        StoreConfig::new(self.max_tokens, self.ttl(), security.maintenance_interval())
    }
}

/// Rate limiting policies
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Login attempts allowed per address per window
    pub rate_limit_login: u32,
    /// Login window in seconds
    pub rate_limit_window_secs: i64,
    pub max_login_attempt_keys: usize,
    pub max_rate_limit_keys: usize,
    pub maintenance_interval_secs: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_login: 10,
            rate_limit_window_secs: 60,
            max_login_attempt_keys: 10_000,
            max_rate_limit_keys: 20_000,
            maintenance_interval_secs: 30,
        }
    }
}

impl SecurityConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit_login: env_or("RATE_LIMIT_LOGIN", defaults.rate_limit_login),
            rate_limit_window_secs: env_or(
                "RATE_LIMIT_WINDOW",
                defaults.rate_limit_window_secs,
            ),
            max_login_attempt_keys: env_or(
                "MAX_LOGIN_ATTEMPT_KEYS",
                defaults.max_login_attempt_keys,
            ),
            max_rate_limit_keys: env_or("MAX_RATE_LIMIT_KEYS", defaults.max_rate_limit_keys),
            maintenance_interval_secs: env_or(
                "SECURITY_MAINTENANCE_INTERVAL_SECONDS",
                defaults.maintenance_interval_secs,
            ),
        }
    }

    pub fn login_window(&self) -> Duration {
        bounded_seconds(self.rate_limit_window_secs as f64)
    }

    pub fn maintenance_interval(&self) -> Duration {
        bounded_seconds(self.maintenance_interval_secs as f64)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.rate_limit_login == 0 {
            return Err(AppError::bad_configuration("RATE_LIMIT_LOGIN must be positive"));
        }
        check_lifetime("RATE_LIMIT_WINDOW", self.rate_limit_window_secs as f64)
    }

    pub fn login_store(&self) -> StoreConfig {
        StoreConfig::new(
            self.max_login_attempt_keys,
            self.login_window(),
            self.maintenance_interval(),
        )
    }

    pub fn api_store(&self) -> StoreConfig {
        StoreConfig::new(
            self.max_rate_limit_keys,
            self.login_window(),
            self.maintenance_interval(),
        )
    }
}
