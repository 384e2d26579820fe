use anyhow::Result;
use std::str::FromStr;

use crate::error::AppError;

mod logging;
mod metrics;
mod security;
mod tasks;

pub use logging::LoggingConfig;
pub use metrics::MetricsConfig;
pub use security::{CsrfConfig, JwtConfig, SecurityConfig, DEFAULT_JWT_SECRET};
pub use tasks::TaskConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_RUST_LOG: &str = "info";

/// Ceiling on every configured lifetime (credentials, tokens, windows, tasks)
pub const MAX_LIFETIME_DAYS: i64 = 3650;

const MAX_LIFETIME_SECS: f64 = (MAX_LIFETIME_DAYS * 86_400) as f64;

/// `seconds` as a duration, clamped into `0..=MAX_LIFETIME_DAYS`.
/// Non-finite and non-positive input gives zero.
pub(crate) fn bounded_seconds(seconds: f64) -> chrono::Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return chrono::Duration::zero();
    }
    chrono::Duration::milliseconds((seconds.min(MAX_LIFETIME_SECS) * 1000.0) as i64)
}

/// Rejects a lifetime that is not finite, not positive, or over the ceiling.
pub(crate) fn check_lifetime(setting: &str, seconds: f64) -> Result<(), AppError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(AppError::bad_configuration(format!(
            "{} must be a positive number",
            setting
        )));
    }
    if seconds > MAX_LIFETIME_SECS {
        return Err(AppError::bad_configuration(format!(
            "{} must not exceed {} days",
            setting, MAX_LIFETIME_DAYS
        )));
    }
    Ok(())
}

/// Reads `key` from the environment, falling back to `default` when it is
/// unset or does not parse.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Deployment posture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "" => Ok(Self::Development),
            _ => anyhow::bail!(
                "Invalid ENVIRONMENT: {}. Must be 'production' or 'development'",
                s
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub environment: Environment,
    /// Honour X-Forwarded-For / X-Real-IP when deriving the client address
    pub trust_proxy_headers: bool,
    pub jwt: JwtConfig,
    pub csrf: CsrfConfig,
    pub security: SecurityConfig,
    pub tasks: TaskConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = match std::env::var("ENVIRONMENT") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Development,
        };

        Ok(Self {
            port: env_or("PORT", DEFAULT_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.to_string()),
            environment,
            trust_proxy_headers: env_or("TRUST_PROXY_HEADERS", false),
            jwt: JwtConfig::from_env(),
            csrf: CsrfConfig::from_env(),
            security: SecurityConfig::from_env(),
            tasks: TaskConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            logging: LoggingConfig::from_env(),
        })
    }

    /// Defaults only, without touching the process environment.
    pub fn development() -> Self {
        Self {
            port: DEFAULT_PORT,
            rust_log: DEFAULT_RUST_LOG.to_string(),
            environment: Environment::Development,
            trust_proxy_headers: false,
            jwt: JwtConfig::default(),
            csrf: CsrfConfig::default(),
            security: SecurityConfig::default(),
            tasks: TaskConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::development(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Fail-fast startup checks.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.is_production() && self.jwt.secret == DEFAULT_JWT_SECRET {
            return Err(AppError::bad_configuration(
                "JWT_SECRET must be changed from the development default in production",
            ));
        }
        self.jwt.validate()?;
        self.csrf.validate()?;
        self.security.validate()?;
        self.tasks.validate()?;

        self.jwt.refresh_store().validate("refresh token")?;
        self.csrf.store(&self.security).validate("csrf token")?;
        self.security.login_store().validate("login attempt")?;
        self.security.api_store().validate("rate limit")?;
        self.tasks.store().validate("task")?;
        Ok(())
    }
}
