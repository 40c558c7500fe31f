pub mod utilities;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("MFA error: {0}")]
    Mfa(#[from] MfaError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked{}", locked_until_suffix(.until))]
    LockedOut { until: Option<DateTime<Utc>> },

    #[error("Lockout not found")]
    LockoutNotFound,

    #[error("Too many failed attempts from this address")]
    IpBlocked,
}

fn locked_until_suffix(until: &Option<DateTime<Utc>>) -> String {
    until.map(|t| format!(" until {t}")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("MFA is not configured for this user")]
    NotConfigured,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Too many verification requests, try again later")]
    RateLimited,

    #[error("MFA is enforced and cannot be disabled")]
    Enforced,

    #[error("MFA is already enabled")]
    AlreadyEnabled,

    #[error("TOTP setup must be started first")]
    SetupRequired,

    #[error("MFA is not enabled")]
    NotEnabled,

    #[error("Invalid or expired recovery token")]
    InvalidRecoveryToken,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Token has been revoked")]
    Blacklisted,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Refusing to publish key set: {0}")]
    KeyPublicationRefused(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache tier '{tier}' unavailable: {message}")]
    Unavailable { tier: &'static str, message: String },

    #[error("Cache serialization failed: {0}")]
    Serialization(String),

    #[error("All cache tiers failed: {0}")]
    AllTiersFailed(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Email delivery failed: {0}")]
    Failed(String),

    #[error("No recipient address available")]
    MissingRecipient,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: String,
        max: String,
    },
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event handler error: {0}")]
    HandlerError(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("JWT signing failed: {0}")]
    JwtSigning(String),

    #[error("JWT verification failed: {0}")]
    JwtVerification(String),
}

impl Error {
    /// The user, MFA configuration or lockout being acted on does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::UserNotFound)
                | Error::Auth(AuthError::LockoutNotFound)
                | Error::Mfa(MfaError::NotConfigured)
                | Error::Storage(StorageError::NotFound)
        )
    }

    pub fn is_invalid_credential(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::InvalidCredentials)
                | Error::Mfa(MfaError::InvalidCode)
                | Error::Mfa(MfaError::InvalidRecoveryToken)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::Mfa(MfaError::RateLimited) | Error::Auth(AuthError::IpBlocked)
        )
    }

    pub fn is_locked_out(&self) -> bool {
        matches!(self, Error::Auth(AuthError::LockedOut { .. }))
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, Error::Mfa(MfaError::Enforced))
    }

    pub fn is_token_error(&self) -> bool {
        matches!(self, Error::Token(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_delivery_error(&self) -> bool {
        matches!(self, Error::Delivery(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
