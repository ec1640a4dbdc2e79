// ABOUTME: Process configuration loaded once from environment variables at startup
// ABOUTME: Missing token-signing settings are a fatal error, not a per-request one

use crate::error::{AppError, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub uploads_dir: PathBuf,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expire_minutes: i64,
    /// TTL for verification/reset links embedded in emails.
    pub email_token_expire_minutes: i64,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| AppError::Configuration(format!("missing required setting {}", name)))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Reads the full configuration from the environment. Token-signing settings
    /// have no defaults; startup aborts without them.
    pub fn from_env() -> Result<Self> {
        let expire_minutes = required("JWT_EXPIRE_MINUTES")?
            .parse::<i64>()
            .map_err(|_| {
                AppError::Configuration("JWT_EXPIRE_MINUTES must be an integer".to_string())
            })?;
        let email_token_expire_minutes = optional("EMAIL_TOKEN_EXPIRE_MINUTES", "1440")
            .parse::<i64>()
            .map_err(|_| {
                AppError::Configuration(
                    "EMAIL_TOKEN_EXPIRE_MINUTES must be an integer".to_string(),
                )
            })?;

        Ok(Self {
            bind_addr: optional("BIND_ADDR", "0.0.0.0:3000"),
            database_url: optional("DATABASE_URL", "sqlite:memoria.db?mode=rwc"),
            uploads_dir: PathBuf::from(optional("UPLOADS_DIR", "uploads")),
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
                issuer: required("JWT_ISSUER")?,
                audience: required("JWT_AUDIENCE")?,
                expire_minutes,
                email_token_expire_minutes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_jwt_settings_are_fatal() {
        // Fully scoped env juggling would race other tests; a bogus var name is enough.
        let err = required("MEMORIA_SETTING_THAT_DOES_NOT_EXIST").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
