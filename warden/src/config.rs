//! Environment-driven configuration.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `WARDEN_JWT_SECRET` | HS256 signing secret, at least 32 bytes |
//! | `WARDEN_JWT_PRIVATE_KEY_PATH` / `WARDEN_JWT_PUBLIC_KEY_PATH` | RS256 PEM key pair, takes precedence over the secret |
//! | `WARDEN_JWT_ISSUER` | `iss` claim |
//! | `WARDEN_JWT_AUDIENCE` | `aud` claim |
//! | `WARDEN_JWT_EXPIRY_MINUTES` | access token lifetime, default 60 |
//! | `WARDEN_TOTP_ISSUER` | issuer shown in authenticator apps |
//! | `WARDEN_TOTP_ENCRYPTION_KEY` | base64 32-byte key sealing TOTP secrets |
//! | `WARDEN_CLEANUP_INTERVAL_SECS` | background cleanup period, default 3600 |
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use warden_core::{crypto::SecretCipher, token::JwtConfig};

pub const JWT_SECRET_VAR: &str = "WARDEN_JWT_SECRET";
pub const JWT_PRIVATE_KEY_PATH_VAR: &str = "WARDEN_JWT_PRIVATE_KEY_PATH";
pub const JWT_PUBLIC_KEY_PATH_VAR: &str = "WARDEN_JWT_PUBLIC_KEY_PATH";
pub const JWT_ISSUER_VAR: &str = "WARDEN_JWT_ISSUER";
pub const JWT_AUDIENCE_VAR: &str = "WARDEN_JWT_AUDIENCE";
pub const JWT_EXPIRY_MINUTES_VAR: &str = "WARDEN_JWT_EXPIRY_MINUTES";
pub const TOTP_ISSUER_VAR: &str = "WARDEN_TOTP_ISSUER";
pub const TOTP_ENCRYPTION_KEY_VAR: &str = "WARDEN_TOTP_ENCRYPTION_KEY";
pub const CLEANUP_INTERVAL_SECS_VAR: &str = "WARDEN_CLEANUP_INTERVAL_SECS";

/// Minimum HS256 secret length in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

pub const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// Settings a deployment usually provides from its environment.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub jwt: JwtConfig,
    pub totp_issuer: Option<String>,
    /// Key sealing TOTP secrets at rest. Without one, enrollments do not survive a restart.
    pub encryption_key: Option<SecretCipher>,
    pub cleanup_interval: StdDuration,
}

impl WardenConfig {
    pub fn new(jwt: JwtConfig) -> Self {
        Self {
            jwt,
            totp_issuer: None,
            encryption_key: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Load configuration from `WARDEN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut jwt = match (var(JWT_PRIVATE_KEY_PATH_VAR), var(JWT_PUBLIC_KEY_PATH_VAR)) {
            (Some(private_key), Some(public_key)) => {
                JwtConfig::from_rs256_pem_files(private_key, public_key).map_err(|e| {
                    ConfigError::Invalid {
                        var: JWT_PRIVATE_KEY_PATH_VAR,
                        message: e.to_string(),
                    }
                })?
            }
            (Some(_), None) => {
                return Err(ConfigError::Missing(JWT_PUBLIC_KEY_PATH_VAR.to_string()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing(JWT_PRIVATE_KEY_PATH_VAR.to_string()));
            }
            (None, None) => {
                let secret = var(JWT_SECRET_VAR).ok_or_else(|| {
                    ConfigError::Missing(format!(
                        "{JWT_SECRET_VAR} or {JWT_PRIVATE_KEY_PATH_VAR}/{JWT_PUBLIC_KEY_PATH_VAR}"
                    ))
                })?;
                if secret.len() < MIN_JWT_SECRET_BYTES {
                    return Err(ConfigError::Invalid {
                        var: JWT_SECRET_VAR,
                        message: format!("must be at least {MIN_JWT_SECRET_BYTES} bytes"),
                    });
                }
                JwtConfig::new_hs256(secret.into_bytes())
            }
        };

        if let Some(issuer) = var(JWT_ISSUER_VAR) {
            jwt = jwt.with_issuer(issuer);
        }
        if let Some(audience) = var(JWT_AUDIENCE_VAR) {
            jwt = jwt.with_audience(audience);
        }
        if let Some(minutes) = parse_positive(JWT_EXPIRY_MINUTES_VAR, var(JWT_EXPIRY_MINUTES_VAR))? {
            jwt = jwt.with_access_token_lifetime(Duration::minutes(minutes as i64));
        }

        let encryption_key = var(TOTP_ENCRYPTION_KEY_VAR)
            .map(|key| {
                SecretCipher::from_base64(key.trim()).map_err(|e| ConfigError::Invalid {
                    var: TOTP_ENCRYPTION_KEY_VAR,
                    message: e.to_string(),
                })
            })
            .transpose()?;

        let cleanup_interval =
            parse_positive(CLEANUP_INTERVAL_SECS_VAR, var(CLEANUP_INTERVAL_SECS_VAR))?
                .map(StdDuration::from_secs)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL);

        Ok(Self {
            jwt,
            totp_issuer: var(TOTP_ISSUER_VAR),
            encryption_key,
            cleanup_interval,
        })
    }
}

fn parse_positive(var: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid {
            var,
            message: format!("expected a positive integer, got '{value}'"),
        }),
        Ok(n) => Ok(Some(n)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use warden_core::token::JwtAlgorithm;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<WardenConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WardenConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_hs256_with_defaults() {
        let config = load(&[(JWT_SECRET_VAR, SECRET)]).unwrap();

        assert!(matches!(config.jwt.algorithm, JwtAlgorithm::HS256 { .. }));
        assert_eq!(config.jwt.access_token_lifetime, Duration::minutes(60));
        assert_eq!(config.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
        assert!(config.encryption_key.is_none());
        assert!(config.totp_issuer.is_none());
    }

    #[test]
    fn test_optional_values() {
        let config = load(&[
            (JWT_SECRET_VAR, SECRET),
            (JWT_ISSUER_VAR, "https://auth.example.com"),
            (JWT_AUDIENCE_VAR, "api"),
            (JWT_EXPIRY_MINUTES_VAR, "5"),
            (TOTP_ISSUER_VAR, "Example"),
            (
                TOTP_ENCRYPTION_KEY_VAR,
                "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
            ),
            (CLEANUP_INTERVAL_SECS_VAR, "60"),
        ])
        .unwrap();

        assert_eq!(config.jwt.issuer.as_deref(), Some("https://auth.example.com"));
        assert_eq!(config.jwt.audience.as_deref(), Some("api"));
        assert_eq!(config.jwt.access_token_lifetime, Duration::minutes(5));
        assert_eq!(config.totp_issuer.as_deref(), Some("Example"));
        assert!(config.encryption_key.is_some());
        assert_eq!(config.cleanup_interval, StdDuration::from_secs(60));
    }

    #[test]
    fn test_missing_signing_key() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing(_))));
        assert!(matches!(
            load(&[(JWT_SECRET_VAR, "   ")]),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = load(&[(JWT_SECRET_VAR, "short")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: JWT_SECRET_VAR, .. }));
    }

    #[test]
    fn test_half_rsa_pair_rejected() {
        let err = load(&[(JWT_PRIVATE_KEY_PATH_VAR, "/keys/private.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(var) if var == JWT_PUBLIC_KEY_PATH_VAR));
    }

    #[test]
    fn test_unreadable_rsa_files() {
        let err = load(&[
            (JWT_PRIVATE_KEY_PATH_VAR, "/nonexistent/private.pem"),
            (JWT_PUBLIC_KEY_PATH_VAR, "/nonexistent/public.pem"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: JWT_PRIVATE_KEY_PATH_VAR, .. }));
    }

    #[test]
    fn test_invalid_numbers() {
        for value in ["0", "-5", "ten"] {
            let err = load(&[(JWT_SECRET_VAR, SECRET), (JWT_EXPIRY_MINUTES_VAR, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: JWT_EXPIRY_MINUTES_VAR, .. }));
        }
    }

    #[test]
    fn test_invalid_encryption_key() {
        let err = load(&[(JWT_SECRET_VAR, SECRET), (TOTP_ENCRYPTION_KEY_VAR, "not-base64!")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: TOTP_ENCRYPTION_KEY_VAR, .. }));
    }
}
