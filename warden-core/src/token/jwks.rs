//! JSON Web Key Set documents
//!
//! External verifiers fetch the key set to check access tokens without calling back.
//! Only the RSA public key is published. A shared HS256 secret would let anyone who
//! reads the document mint tokens, so [`build_key_set`] refuses it unless
//! [`JwtConfig::allow_symmetric_publication`] is set.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rsa::{
    RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{JwtAlgorithm, JwtConfig};
use crate::error::{CryptoError, Error, TokenError};

/// Characters of the hashed key kept as the key id.
const KEY_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    /// RSA modulus, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Symmetric key, base64url. Only present with legacy symmetric publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl Jwks {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Build the key set for `config`.
pub fn build_key_set(config: &JwtConfig) -> Result<Jwks, Error> {
    let kid = config.key_id()?;

    let key = match &config.algorithm {
        JwtAlgorithm::RS256 { public_key, .. } => {
            let public_key = parse_rsa_public_key(public_key)?;
            Jwk {
                kty: "RSA".to_string(),
                key_use: "sig".to_string(),
                alg: "RS256".to_string(),
                kid,
                n: Some(BASE64_URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be())),
                e: Some(BASE64_URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be())),
                k: None,
            }
        }
        JwtAlgorithm::HS256 { secret_key } => {
            if !config.allow_symmetric_publication {
                return Err(TokenError::KeyPublicationRefused(
                    "HS256 signing secret cannot be published; configure RS256 keys".to_string(),
                )
                .into());
            }
            tracing::warn!(
                kid = %kid,
                "Publishing symmetric signing secret in key set; any reader can mint tokens"
            );
            Jwk {
                kty: "oct".to_string(),
                key_use: "sig".to_string(),
                alg: "HS256".to_string(),
                kid,
                n: None,
                e: None,
                k: Some(BASE64_URL_SAFE_NO_PAD.encode(secret_key)),
            }
        }
    };

    Ok(Jwks {
        keys: vec![key],
        issuer: config.issuer.clone(),
    })
}

/// Truncated SHA-256 of the verification key, base64url encoded.
pub(crate) fn derive_key_id(algorithm: &JwtAlgorithm) -> Result<String, CryptoError> {
    let material = match algorithm {
        JwtAlgorithm::RS256 { public_key, .. } => parse_rsa_public_key(public_key)?
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(format!("Cannot encode RSA public key: {e}")))?
            .as_bytes()
            .to_vec(),
        JwtAlgorithm::HS256 { secret_key } => secret_key.clone(),
    };

    let digest = Sha256::digest(&material);
    let mut kid = BASE64_URL_SAFE_NO_PAD.encode(digest);
    kid.truncate(KEY_ID_LEN);
    Ok(kid)
}

/// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
fn parse_rsa_public_key(pem: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let pem = std::str::from_utf8(pem)
        .map_err(|e| CryptoError::InvalidKey(format!("RSA public key is not UTF-8: {e}")))?;

    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid RSA public key: {e}")))
}
