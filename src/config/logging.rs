// ============================================================================
// Logging Configuration
// ============================================================================

use rand::RngCore;

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Salt for `log_safe_id`; identities are only ever logged hashed
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        let hash_salt = match std::env::var("LOG_HASH_SALT") {
            Ok(salt) if !salt.trim().is_empty() => salt,
            _ => {
                tracing::debug!("LOG_HASH_SALT not set, using a per-process random salt");
                random_salt()
            }
        };
        Self { hash_salt }
    }

    pub(crate) fn development() -> Self {
        Self {
            hash_salt: "development-log-salt".to_string(),
        }
    }
}

fn random_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
