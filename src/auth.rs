use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::store::{BoundedStore, SweepReport};
use crate::users::{Role, User, UserDirectory};
use crate::utils::log_safe_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub jti: String, // unique per token
    pub iat: i64,    // Issued at
    pub exp: i64,    // Expiration time
}

/// Why a credential failed verification
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Expired => AppError::unauthorized("Token expired"),
            CredentialError::Invalid => AppError::unauthorized("Invalid token"),
        }
    }
}

/// What the refresh store remembers about an issued refresh credential
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// Issues and verifies HS256 session credentials.
///
/// Access credentials are stateless and live until they expire. Refresh
/// credentials are additionally recorded in a bounded store and are only
/// honoured while present there, so logout revokes them.
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
    refresh_tokens: BoundedStore<String, RefreshRecord>,
    users: Arc<UserDirectory>,
    clock: Arc<dyn Clock>,
    log_salt: String,
}

impl AuthManager {
    pub fn new(config: &Config, users: Arc<UserDirectory>, clock: Arc<dyn Clock>) -> AppResult<Self> {
        config.jwt.validate()?;
        let access_ttl = config.jwt.access_ttl();
        let refresh_ttl = config.jwt.refresh_ttl();

        let store_config = config.jwt.refresh_store();
        store_config.validate("refresh token")?;

        // Expiry is checked against the injected clock instead.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt.secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
            refresh_tokens: BoundedStore::new("refresh_tokens", store_config, clock.clone()),
            users,
            clock,
            log_salt: config.logging.hash_salt.clone(),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Create access token (short-lived, never stored)
    pub fn issue_access(&self, identity: &str, name: &str, role: Role) -> AppResult<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: identity.to_string(),
            name: Some(name.to_string()),
            role: Some(role),
            token_type: TokenType::Access,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    pub fn issue_access_for(&self, user: &User) -> AppResult<String> {
        self.issue_access(&user.email, &user.name, user.role)
    }

    /// Create refresh token and record it in the refresh store
    pub fn issue_refresh(&self, identity: &str) -> AppResult<String> {
        let now = self.clock.now();
        let expires_at = now + self.refresh_ttl;
        let claims = Claims {
            sub: identity.to_string(),
            name: None,
            role: None,
            token_type: TokenType::Refresh,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        self.refresh_tokens.put_with_expiry(
            token.clone(),
            RefreshRecord {
                identity: identity.to_string(),
                expires_at,
                issued_at: now,
            },
            expires_at,
        );
        tracing::debug!(
            user_hash = %log_safe_id(identity, &self.log_salt),
            "Refresh token issued"
        );
        Ok(token)
    }

    /// Check signature, structure and expiry. Does not consult the refresh store.
    pub fn verify(&self, token: &str) -> Result<Claims, CredentialError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token decode failed");
                CredentialError::Invalid
            })?
            .claims;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(CredentialError::Expired);
        }
        Ok(claims)
    }

    /// Verify a bearer credential that must be an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims, CredentialError> {
        let claims = self.verify(token)?;
        if claims.token_type != TokenType::Access {
            return Err(CredentialError::Invalid);
        }
        Ok(claims)
    }

    /// Exchange a recorded refresh credential for a new access credential.
    pub fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        let key = refresh_token.to_string();
        // Raw membership: an expired record is still "known" so it can be
        // removed below as it is rejected.
        let known = self
            .refresh_tokens
            .atomically(|view| view.entry(&key).is_some());
        if !known {
            return Err(AppError::unauthorized("Invalid refresh token"));
        }

        let claims = match self.verify(refresh_token) {
            Ok(claims) => claims,
            Err(CredentialError::Expired) => {
                self.refresh_tokens.delete(&key);
                return Err(AppError::unauthorized(
                    "Refresh token expired, please log in again",
                ));
            }
            Err(CredentialError::Invalid) => {
                return Err(AppError::unauthorized("Invalid refresh token"));
            }
        };

        if claims.token_type != TokenType::Refresh {
            return Err(AppError::unauthorized("Wrong token type"));
        }

        let user = self
            .users
            .get(&claims.sub)
            .ok_or_else(|| AppError::unauthorized("User not found"))?;

        tracing::info!(
            user_hash = %log_safe_id(&user.email, &self.log_salt),
            "Access token refreshed"
        );
        self.issue_access_for(user)
    }

    /// Forget a refresh credential. Unknown credentials are ignored.
    pub fn revoke(&self, refresh_token: &str) -> bool {
        let removed = self.refresh_tokens.delete(&refresh_token.to_string());
        if let Some(record) = &removed {
            tracing::info!(
                user_hash = %log_safe_id(&record.identity, &self.log_salt),
                "Refresh token revoked"
            );
        }
        removed.is_some()
    }

    /// Seconds until `claims` expire, never negative.
    pub fn remaining_seconds(&self, claims: &Claims) -> i64 {
        (claims.exp - self.clock.now().timestamp()).max(0)
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }

    pub fn maintain(&self, force: bool) -> SweepReport {
        self.refresh_tokens.maintain(force)
    }
}
