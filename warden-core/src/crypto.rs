//! Cryptographic utilities for secure token and code handling
//!
//! Codes and tokens are stored as SHA256 hashes and verified with constant-time
//! comparison via the `subtle` crate. Every random value (refresh tokens, backup
//! codes, email OTPs) comes from a CSPRNG with uniform sampling over the target
//! alphabet.
//!
//! The TOTP shared secret cannot be hashed because it must be recovered to compute
//! codes, so it is encrypted at rest with ChaCha20-Poly1305. The stored form is
//! `base64(nonce (12 bytes) || ciphertext)` and the owning user id is bound in as
//! associated data.

use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{Rng, TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

/// Length in bytes of the key accepted by [`SecretCipher`].
pub const SECRET_KEY_LEN: usize = 32;

/// Fill a buffer of `len` bytes from the operating system CSPRNG.
///
/// # Panics
///
/// Panics if the OS random number generator fails. This indicates a critical
/// system failure from which recovery is not possible for security-sensitive operations.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    bytes
}

/// Generate a random token of `len` bytes encoded as standard base64.
pub fn generate_secure_token(len: usize) -> String {
    STANDARD.encode(random_bytes(len))
}

/// Generate a numeric code of `digits` digits, uniformly distributed.
pub fn random_numeric_code(digits: usize) -> String {
    random_code(b"0123456789", digits)
}

/// Generate a code of `len` characters drawn uniformly from `alphabet`.
pub fn random_code(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Hash a token for secure storage using SHA256.
///
/// # Returns
///
/// A hex-encoded SHA256 hash of the token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a token against a stored hash with constant-time comparison.
pub fn verify_token_hash(token: &str, stored_hash: &str) -> bool {
    let computed_hash = hash_token(token);
    constant_time_compare(computed_hash.as_bytes(), stored_hash.as_bytes())
}

/// Perform constant-time comparison of two byte slices.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Symmetric cipher for secrets that must be recoverable, such as TOTP seeds.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; SECRET_KEY_LEN],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Create a cipher from exactly 32 bytes of key material.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SECRET_KEY_LEN] = key.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {SECRET_KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Create a cipher from a base64-encoded 32 byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("key is not valid base64: {e}")))?;
        Self::new(&key)
    }

    /// Create a cipher with a freshly generated key. Useful for tests and development.
    pub fn random() -> Self {
        let mut key = [0u8; SECRET_KEY_LEN];
        key.copy_from_slice(&random_bytes(SECRET_KEY_LEN));
        Self { key }
    }

    /// Encrypt `plaintext`, binding it to `context` (the owning user id).
    pub fn encrypt(&self, plaintext: &str, context: &str) -> Result<String, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));

        let nonce_bytes = random_bytes(NONCE_LEN);
        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: context.as_bytes(),
        };

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`SecretCipher::encrypt`] with the same `context`.
    pub fn decrypt(&self, sealed: &str, context: &str) -> Result<String, CryptoError> {
        let data = STANDARD
            .decode(sealed)
            .map_err(|e| CryptoError::Decryption(format!("invalid encoding: {e}")))?;

        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decryption(
                "ciphertext is too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let payload = Payload {
            msg: ciphertext,
            aad: context.as_bytes(),
        };

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_token() {
        let token = "ABCDE-FGHJK";
        let hash = hash_token(token);

        assert!(verify_token_hash(token, &hash));
        assert!(!verify_token_hash("ABCDE-FGHJL", &hash));
    }

    #[test]
    fn test_hash_produces_hex_string() {
        let hash = hash_token("123456");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"hello", b"hello"));
        assert!(!constant_time_compare(b"hello", b"world"));
        assert!(!constant_time_compare(b"short", b"longer_string"));
    }

    #[test]
    fn test_random_numeric_code() {
        for _ in 0..50 {
            let code = random_numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_random_code_stays_in_alphabet() {
        let alphabet = b"ABC";
        let code = random_code(alphabet, 64);
        assert_eq!(code.len(), 64);
        assert!(code.bytes().all(|b| alphabet.contains(&b)));
    }

    #[test]
    fn test_secure_token_entropy() {
        let token = generate_secure_token(64);
        let decoded = STANDARD.decode(&token).unwrap();
        assert_eq!(decoded.len(), 64);
        assert_ne!(token, generate_secure_token(64));
    }

    #[test]
    fn test_secret_cipher_round_trip() {
        let cipher = SecretCipher::random();
        let sealed = cipher.encrypt("JBSWY3DPEHPK3PXP", "usr_1").unwrap();

        assert_ne!(sealed, "JBSWY3DPEHPK3PXP");
        assert_eq!(cipher.decrypt(&sealed, "usr_1").unwrap(), "JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn test_secret_cipher_uses_fresh_nonce() {
        let cipher = SecretCipher::random();
        let a = cipher.encrypt("secret", "usr_1").unwrap();
        let b = cipher.encrypt("secret", "usr_1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_secret_cipher_rejects_wrong_context_or_key() {
        let cipher = SecretCipher::random();
        let sealed = cipher.encrypt("secret", "usr_1").unwrap();

        assert!(cipher.decrypt(&sealed, "usr_2").is_err());
        assert!(SecretCipher::random().decrypt(&sealed, "usr_1").is_err());
        assert!(cipher.decrypt("AAAA", "usr_1").is_err());
    }

    #[test]
    fn test_secret_cipher_key_length() {
        assert!(SecretCipher::new(&[0u8; 16]).is_err());
        assert!(SecretCipher::new(&[0u8; 32]).is_ok());
        assert!(SecretCipher::from_base64(&STANDARD.encode([7u8; 32])).is_ok());
        assert!(SecretCipher::from_base64("not base64!").is_err());
    }
}
