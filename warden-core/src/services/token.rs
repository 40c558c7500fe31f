//! Access token issuance, verification and revocation.
//!
//! Revoked tokens are tracked by `jti` in the [`TieredCache`] until they would have
//! expired anyway. When no cache tier can be read, validation treats the token as
//! revoked rather than guess.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Header, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    Error, User,
    cache::TieredCache,
    crypto,
    error::{CryptoError, TokenError},
    events::{EventBus, SecurityEvent},
    token::{AccessClaims, IssuedAccessToken, JwtConfig, decode_unverified},
};

pub const BLACKLIST_KEY_PREFIX: &str = "blacklisted_token:";

/// Random bytes behind each refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlacklistEntry {
    token_id: String,
    expires_at: DateTime<Utc>,
    revoked_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    config: JwtConfig,
    cache: TieredCache,
    events: EventBus,
}

impl TokenIssuer {
    pub fn new(config: JwtConfig, cache: TieredCache, events: EventBus) -> Self {
        Self {
            config,
            cache,
            events,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn issue_access_token(&self, user: &User) -> Result<IssuedAccessToken, Error> {
        self.issue_access_token_at(user, Utc::now())
    }

    /// Sign an access token as if issued at `issued_at`.
    pub fn issue_access_token_at(
        &self,
        user: &User,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedAccessToken, Error> {
        let claims = AccessClaims::for_user(user, &self.config, issued_at);

        let mut header = Header::new(self.config.jwt_algorithm());
        if self.config.is_asymmetric() || self.config.allow_symmetric_publication {
            header.kid = Some(self.config.key_id()?);
        }

        let token = jsonwebtoken::encode(&header, &claims, &self.config.get_encoding_key()?)
            .map_err(|e| CryptoError::JwtSigning(e.to_string()))?;

        Ok(IssuedAccessToken {
            token,
            token_id: claims.jti,
            expires_at: issued_at + self.config.access_token_lifetime,
        })
    }

    /// Opaque refresh token, base64 of [`REFRESH_TOKEN_BYTES`] random bytes.
    pub fn issue_refresh_token(&self) -> String {
        crypto::generate_secure_token(REFRESH_TOKEN_BYTES)
    }

    /// Check signature, expiry, issuer, audience and the blacklist.
    pub async fn verify(&self, token: &str) -> Result<AccessClaims, Error> {
        let data = jsonwebtoken::decode::<AccessClaims>(
            token,
            &self.config.get_decoding_key()?,
            &self.config.get_validation(),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        })?;

        if self.is_blacklisted(&data.claims.jti).await? {
            return Err(TokenError::Blacklisted.into());
        }
        Ok(data.claims)
    }

    /// [`TokenIssuer::verify`] collapsed to an option. Every failure means "not valid".
    pub async fn validate(&self, token: &str) -> Option<AccessClaims> {
        match self.verify(token).await {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected access token");
                None
            }
        }
    }

    /// Blacklist a token id until `expires_at` plus the validation leeway.
    ///
    /// The entry has to outlive the leeway, since `verify` still accepts the token for
    /// that long past `exp`. Returns `false` without writing when the token can no
    /// longer validate.
    pub async fn blacklist(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<bool, Error> {
        let now = Utc::now();
        let accepted_until = expires_at + Duration::seconds(self.config.leeway_seconds as i64);
        let Some(ttl) = (accepted_until - now)
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
        else {
            return Ok(false);
        };

        let entry = BlacklistEntry {
            token_id: token_id.to_string(),
            expires_at,
            revoked_at: now,
        };
        self.cache.set(&blacklist_key(token_id), &entry, ttl).await?;

        tracing::info!(token_id, expires_at = %expires_at, "Blacklisted access token");
        self.events
            .emit(&SecurityEvent::TokenRevoked {
                token_id: token_id.to_string(),
                expires_at,
                timestamp: now,
            })
            .await;
        Ok(true)
    }

    pub async fn is_blacklisted(&self, token_id: &str) -> Result<bool, Error> {
        Ok(self.cache.exists(&blacklist_key(token_id)).await?)
    }

    /// `jti` of a token, read without verifying the signature.
    pub fn token_id(&self, token: &str) -> Option<String> {
        decode_unverified(token).and_then(|claims| claims.jti)
    }

    /// Expiry of a token, read without verifying the signature.
    pub fn token_expiry(&self, token: &str) -> Option<DateTime<Utc>> {
        decode_unverified(token)
            .and_then(|claims| claims.exp)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Blacklist a raw token. Returns `false` for unparseable or already expired tokens.
    pub async fn revoke(&self, token: &str) -> Result<bool, Error> {
        let Some(claims) = decode_unverified(token) else {
            return Ok(false);
        };
        let (Some(token_id), Some(expires_at)) = (
            claims.jti,
            claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
        ) else {
            return Ok(false);
        };
        self.blacklist(&token_id, expires_at).await
    }
}

fn blacklist_key(token_id: &str) -> String {
    format!("{BLACKLIST_KEY_PREFIX}{token_id}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        cache::{CacheTier, Expiry},
        error::CacheError,
        token::test_keys,
    };

    struct DownTier;

    #[async_trait]
    impl CacheTier for DownTier {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable {
                tier: "down",
                message: "connection refused".to_string(),
            })
        }

        async fn set(&self, _key: &str, _value: String, _expiry: Expiry) -> Result<(), CacheError> {
            Err(CacheError::Unavailable {
                tier: "down",
                message: "connection refused".to_string(),
            })
        }

        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable {
                tier: "down",
                message: "connection refused".to_string(),
            })
        }
    }

    fn user() -> User {
        User::builder()
            .username("alice")
            .email("alice@example.com")
            .first_name("Alice")
            .email_confirmed(true)
            .role("admin")
            .build()
            .unwrap()
    }

    fn hs256_issuer() -> TokenIssuer {
        TokenIssuer::new(
            JwtConfig::new_hs256(test_keys::HS256_SECRET.to_vec()).with_issuer("warden"),
            TieredCache::in_memory(),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let issuer = hs256_issuer();
        let user = user();
        let issued = issuer.issue_access_token(&user).unwrap();

        let claims = issuer.validate(&issued.token).await.unwrap();
        assert_eq!(claims.user_id(), user.id);
        assert_eq!(claims.jti, issued.token_id);
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert!(claims.email_confirmed);
        assert!(claims.has_role("admin"));
        assert_eq!(issuer.token_id(&issued.token), Some(issued.token_id.clone()));
        assert_eq!(issuer.token_expiry(&issued.token).map(|t| t.timestamp()), Some(issued.expires_at.timestamp()));
    }

    #[tokio::test]
    async fn test_rs256_header_carries_kid() {
        let config = JwtConfig::new_rs256(
            test_keys::RS256_PRIVATE_KEY.to_vec(),
            test_keys::RS256_PUBLIC_KEY.to_vec(),
        );
        let kid = config.key_id().unwrap();
        let issuer = TokenIssuer::new(config, TieredCache::in_memory(), EventBus::default());

        let issued = issuer.issue_access_token(&user()).unwrap();
        let header = jsonwebtoken::decode_header(&issued.token).unwrap();
        assert_eq!(header.kid, Some(kid));
        assert!(issuer.validate(&issued.token).await.is_some());
    }

    #[tokio::test]
    async fn test_hs256_header_has_no_kid() {
        let issued = hs256_issuer().issue_access_token(&user()).unwrap();
        let header = jsonwebtoken::decode_header(&issued.token).unwrap();
        assert!(header.kid.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let issuer = hs256_issuer();
        let issued = issuer
            .issue_access_token_at(&user(), Utc::now() - Duration::hours(3))
            .unwrap();

        assert!(matches!(
            issuer.verify(&issued.token).await,
            Err(Error::Token(TokenError::Expired))
        ));
        assert!(issuer.validate(&issued.token).await.is_none());
    }

    #[tokio::test]
    async fn test_blacklisted_token_is_rejected() {
        let issuer = hs256_issuer();
        let issued = issuer.issue_access_token(&user()).unwrap();

        assert!(issuer.blacklist(&issued.token_id, issued.expires_at).await.unwrap());
        assert!(issuer.is_blacklisted(&issued.token_id).await.unwrap());
        assert!(matches!(
            issuer.verify(&issued.token).await,
            Err(Error::Token(TokenError::Blacklisted))
        ));
    }

    #[tokio::test]
    async fn test_blacklisting_expired_token_is_a_no_op() {
        let issuer = hs256_issuer();
        let stored = issuer
            .blacklist("jti-old", Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert!(!stored);
        assert!(!issuer.is_blacklisted("jti-old").await.unwrap());
    }

    #[tokio::test]
    async fn test_token_inside_leeway_is_still_blacklisted() {
        // Past `exp` but within the 300 s leeway the token still verifies
        let issuer = hs256_issuer();
        assert!(
            issuer
                .blacklist("jti-grace", Utc::now() - Duration::minutes(1))
                .await
                .unwrap()
        );
        assert!(issuer.is_blacklisted("jti-grace").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoked_token_stays_invalid_past_natural_expiry() {
        let issuer = TokenIssuer::new(
            JwtConfig::new_hs256(test_keys::HS256_SECRET.to_vec())
                .with_issuer("warden")
                .with_access_token_lifetime(Duration::seconds(1))
                .with_leeway_seconds(5),
            TieredCache::in_memory(),
            EventBus::default(),
        );
        let issued = issuer.issue_access_token(&user()).unwrap();
        assert!(issuer.revoke(&issued.token).await.unwrap());
        assert!(issuer.validate(&issued.token).await.is_none());

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

        // `exp` has passed, the signature check alone would still accept it
        assert!(matches!(
            issuer.verify(&issued.token).await,
            Err(Error::Token(TokenError::Blacklisted))
        ));
    }

    #[tokio::test]
    async fn test_revoke_raw_token() {
        let issuer = hs256_issuer();
        let issued = issuer.issue_access_token(&user()).unwrap();

        assert!(issuer.revoke(&issued.token).await.unwrap());
        assert!(issuer.validate(&issued.token).await.is_none());
        assert!(!issuer.revoke("not-a-jwt").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_and_foreign_tokens() {
        let issuer = hs256_issuer();
        let issued = issuer.issue_access_token(&user()).unwrap();

        let foreign = TokenIssuer::new(
            JwtConfig::new_hs256(b"another-secret-another-secret-32".to_vec()).with_issuer("warden"),
            TieredCache::in_memory(),
            EventBus::default(),
        );
        assert!(matches!(
            foreign.verify(&issued.token).await,
            Err(Error::Token(TokenError::Invalid(_)))
        ));

        let wrong_issuer = TokenIssuer::new(
            JwtConfig::new_hs256(test_keys::HS256_SECRET.to_vec()).with_issuer("someone-else"),
            TieredCache::in_memory(),
            EventBus::default(),
        );
        assert!(wrong_issuer.validate(&issued.token).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_cache_fails_closed() {
        let issuer = TokenIssuer::new(
            JwtConfig::new_hs256(test_keys::HS256_SECRET.to_vec()),
            TieredCache::new(vec![Arc::new(DownTier)]),
            EventBus::default(),
        );
        let issued = issuer.issue_access_token(&user()).unwrap();

        assert!(matches!(
            issuer.verify(&issued.token).await,
            Err(Error::Cache(CacheError::AllTiersFailed(_)))
        ));
        assert!(issuer.validate(&issued.token).await.is_none());
        assert!(issuer.blacklist(&issued.token_id, issued.expires_at).await.is_err());
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let issuer = hs256_issuer();
        let a = issuer.issue_refresh_token();
        let b = issuer.issue_refresh_token();
        assert_ne!(a, b);
        assert!(a.len() >= 86);
    }
}
