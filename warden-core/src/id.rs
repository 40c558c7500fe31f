//! ID generation utilities with prefix support
//!
//! Every persisted entity gets an opaque `{prefix}_{random}` identifier with at least
//! 96 bits of entropy, URL-safe base64 encoded. Typed wrappers keep lockout ids from
//! being passed where a session id is expected.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

/// Generate a prefixed ID with at least 96 bits of entropy
///
/// The ID format is: `{prefix}_{random_string}`
///
/// # Panics
///
/// Panics if the OS random number generator fails.
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that a prefixed ID has the expected format
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12,
        Err(_) => false,
    }
}

/// Extract the prefix from a prefixed ID
pub fn extract_prefix(id: &str) -> Option<&str> {
    id.split_once('_').map(|(prefix, _)| prefix)
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new(id: &str) -> Self {
                Self(id.to_string())
            }

            pub fn new_random() -> Self {
                Self($crate::id::generate_prefixed_id($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }

            /// Validate that this ID carries the expected prefix and entropy
            pub fn is_valid(&self) -> bool {
                $crate::id::validate_prefixed_id(&self.0, $prefix)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new_random()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

prefixed_id!(
    /// A unique, stable identifier for a user. Treat it as opaque.
    UserId,
    "usr"
);
prefixed_id!(SessionId, "ses");
prefixed_id!(LoginAttemptId, "att");
prefixed_id!(LockoutId, "lck");
prefixed_id!(SettingsId, "set");
prefixed_id!(MfaSettingsId, "mfa");
prefixed_id!(BackupCodeId, "bkc");
prefixed_id!(
    /// Groups the backup codes generated together.
    BackupCodeBatchId,
    "bkb"
);
prefixed_id!(EmailOtpId, "otp");
prefixed_id!(AuditEntryId, "aud");
