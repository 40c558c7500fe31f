//! Time-based one-time passwords (RFC 6238)
//!
//! HMAC-SHA1 over 30 second steps, 6 digit codes, and one step of drift tolerated in
//! each direction. Secrets are 160 random bits, Base32 encoded without padding, which
//! is what Google Authenticator and compatible apps expect.

use base32::Alphabet;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{crypto, error::ValidationError};

const BASE32: Alphabet = Alphabet::Rfc4648 { padding: false };

#[derive(Debug, Clone)]
pub struct TotpConfig {
    /// Step length in seconds
    pub period: u64,
    pub digits: u32,
    /// Steps accepted either side of the current one
    pub skew: u64,
    /// Secret length in bytes
    pub secret_length: usize,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            period: 30,
            digits: 6,
            skew: 1,
            secret_length: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TotpGenerator {
    config: TotpConfig,
}

impl TotpGenerator {
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Generate a fresh Base32 encoded secret.
    pub fn generate_secret(&self) -> String {
        base32::encode(BASE32, &crypto::random_bytes(self.config.secret_length))
    }

    /// Code for a given time step counter.
    pub fn code_for_step(&self, secret: &str, step: u64) -> Result<String, ValidationError> {
        let key = decode_secret(secret)?;
        self.hotp(&key, step)
    }

    /// Code valid at a unix timestamp.
    pub fn code_at(&self, secret: &str, timestamp: u64) -> Result<String, ValidationError> {
        self.code_for_step(secret, timestamp / self.config.period)
    }

    pub fn current_code(&self, secret: &str) -> Result<String, ValidationError> {
        self.code_at(secret, now_secs())
    }

    /// Check `code` against the steps around `timestamp`.
    ///
    /// Malformed codes are rejected before any HMAC is computed. Comparison is constant-time.
    pub fn verify_at(
        &self,
        secret: &str,
        code: &str,
        timestamp: u64,
    ) -> Result<bool, ValidationError> {
        if !self.is_valid_format(code) {
            return Ok(false);
        }

        let key = decode_secret(secret)?;
        let current = timestamp / self.config.period;
        let first = current.saturating_sub(self.config.skew);
        let last = current.saturating_add(self.config.skew);

        let mut matched = false;
        for step in first..=last {
            let expected = self.hotp(&key, step)?;
            matched |= crypto::constant_time_compare(expected.as_bytes(), code.as_bytes());
        }
        Ok(matched)
    }

    pub fn verify(&self, secret: &str, code: &str) -> Result<bool, ValidationError> {
        self.verify_at(secret, code, now_secs())
    }

    /// Exactly `digits` ASCII digits.
    pub fn is_valid_format(&self, code: &str) -> bool {
        code.len() == self.config.digits as usize && code.bytes().all(|b| b.is_ascii_digit())
    }

    /// `otpauth://` URI for QR enrollment.
    pub fn provisioning_uri(&self, secret: &str, issuer: &str, account: &str) -> String {
        let issuer = urlencoding::encode(issuer);
        let account = urlencoding::encode(account);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={}&period={}",
            self.config.digits, self.config.period
        )
    }

    /// Seconds until the current code rolls over.
    pub fn remaining_seconds(&self) -> u64 {
        self.config.period - now_secs() % self.config.period
    }

    fn hotp(&self, key: &[u8], counter: u64) -> Result<String, ValidationError> {
        let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
            .map_err(|_| ValidationError::InvalidField("invalid TOTP secret key".to_string()))?;
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let binary = (u32::from(hash[offset] & 0x7f) << 24)
            | (u32::from(hash[offset + 1]) << 16)
            | (u32::from(hash[offset + 2]) << 8)
            | u32::from(hash[offset + 3]);

        let code = binary % 10u32.pow(self.config.digits);
        Ok(format!("{code:0width$}", width = self.config.digits as usize))
    }
}

/// Group a secret into blocks of four for manual entry or paper backup.
pub fn format_secret_for_backup(secret: &str) -> String {
    secret
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, ValidationError> {
    let clean: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();
    match base32::decode(BASE32, &clean) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(ValidationError::InvalidField(
            "TOTP secret is not valid Base32".to_string(),
        )),
    }
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
