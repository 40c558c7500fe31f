//! Cached publication of the JSON Web Key Set.

use std::time::Duration;

use crate::{
    Error,
    cache::TieredCache,
    error::utilities::BestEffortExt,
    token::{
        JwtConfig,
        jwks::{Jwks, build_key_set},
    },
};

pub const JWKS_CACHE_KEY: &str = "jwks_cache";
pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct JwksPublisher {
    config: JwtConfig,
    cache: TieredCache,
}

impl JwksPublisher {
    pub fn new(config: JwtConfig, cache: TieredCache) -> Self {
        Self { config, cache }
    }

    /// The key set, from the cache when fresh.
    ///
    /// An unreachable cache only costs a rebuild. A configuration that must not be
    /// published (HS256 without opt-in) is an error every time.
    pub async fn publish_key_set(&self) -> Result<Jwks, Error> {
        match self.cache.get::<Jwks>(JWKS_CACHE_KEY).await {
            Ok(Some(jwks)) => return Ok(jwks),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Key set cache unavailable, rebuilding"),
        }

        let jwks = build_key_set(&self.config)?;
        self.cache
            .set(JWKS_CACHE_KEY, &jwks, JWKS_CACHE_TTL)
            .await
            .best_effort("cache key set");
        tracing::debug!(keys = jwks.keys.len(), "Built key set");
        Ok(jwks)
    }

    /// Drop the cached key set, e.g. after rotating keys.
    pub async fn invalidate(&self) -> Result<(), Error> {
        Ok(self.cache.remove(JWKS_CACHE_KEY).await?)
    }
}
