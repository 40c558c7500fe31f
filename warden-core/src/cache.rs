//! Tiered cache
//!
//! Token blacklist entries, the published key set and MFA recovery tokens live in a
//! [`TieredCache`]. It holds an ordered list of [`CacheTier`]s, typically a
//! distributed tier followed by the in-process [`MemoryCacheTier`].
//!
//! Reads walk the tiers top-down and skip a tier that errors. Writes go to every tier
//! and only fail when no tier accepted them.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::cache::{TieredCache, Expiry};
//!
//! let cache = TieredCache::in_memory();
//! cache.set("jwks_cache", &key_set, Duration::from_secs(3600)).await?;
//! let cached: Option<Jwks> = cache.get("jwks_cache").await?;
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::CacheError;

/// How long an entry stays in a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expires a fixed time after it was written.
    Absolute(Duration),
    /// Expires after a period without reads. Each hit pushes the deadline forward.
    Sliding(Duration),
}

impl Expiry {
    fn ttl(&self) -> Duration {
        match self {
            Expiry::Absolute(ttl) | Expiry::Sliding(ttl) => *ttl,
        }
    }
}

/// One storage layer of a [`TieredCache`]. Values are opaque JSON strings.
#[async_trait]
pub trait CacheTier: Send + Sync + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, expiry: Expiry) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

struct CacheEntry {
    value: String,
    expiry: Expiry,
    expires_at: Instant,
}

/// In-process tier backed by a concurrent hash map.
///
/// Expired entries are dropped lazily when read, or in bulk by [`purge_expired`](Self::purge_expired).
#[derive(Default)]
pub struct MemoryCacheTier {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheTier for MemoryCacheTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at > now => {
                if let Expiry::Sliding(ttl) = entry.expiry {
                    entry.expires_at = now + ttl;
                }
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
            None => return Ok(None),
        }

        // The shard guard is released before removal
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, expiry: Expiry) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expiry,
                expires_at: Instant::now() + expiry.ttl(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now))
    }
}

/// Ordered fallback over several cache tiers with typed access.
#[derive(Clone)]
pub struct TieredCache {
    tiers: Vec<Arc<dyn CacheTier>>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field(
                "tiers",
                &self.tiers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TieredCache {
    /// Tiers are consulted in the order given.
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>) -> Self {
        Self { tiers }
    }

    /// A cache with a single in-process tier.
    pub fn in_memory() -> Self {
        Self::new(vec![Arc::new(MemoryCacheTier::new())])
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Read a value, falling through to lower tiers on a miss or a tier failure.
    ///
    /// Errors only when every tier failed.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut failures = Vec::new();

        for tier in &self.tiers {
            match tier.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(value) => return Ok(Some(value)),
                    Err(e) => {
                        tracing::warn!(
                            tier = tier.name(),
                            key,
                            error = %e,
                            "Discarding undecodable cache entry"
                        );
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tier = tier.name(), key, error = %e, "Cache tier read failed");
                    failures.push(e.to_string());
                }
            }
        }

        if !self.tiers.is_empty() && failures.len() == self.tiers.len() {
            return Err(CacheError::AllTiersFailed(failures.join("; ")));
        }
        Ok(None)
    }

    /// Store a value with an absolute time to live.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_with_expiry(key, value, Expiry::Absolute(ttl)).await
    }

    /// Store a value whose expiry slides forward on every read.
    pub async fn set_sliding<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_with_expiry(key, value, Expiry::Sliding(ttl)).await
    }

    pub async fn set_with_expiry<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
    ) -> Result<(), CacheError> {
        let raw =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.write_all(key, |tier| {
            let raw = raw.clone();
            async move { tier.set(key, raw, expiry).await }
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.write_all(key, |tier| async move { tier.remove(key).await })
            .await
    }

    /// Whether any reachable tier holds a live entry for `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut failures = Vec::new();

        for tier in &self.tiers {
            match tier.exists(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(tier = tier.name(), key, error = %e, "Cache tier lookup failed");
                    failures.push(e.to_string());
                }
            }
        }

        if !self.tiers.is_empty() && failures.len() == self.tiers.len() {
            return Err(CacheError::AllTiersFailed(failures.join("; ")));
        }
        Ok(false)
    }

    async fn write_all<F, Fut>(&self, key: &str, op: F) -> Result<(), CacheError>
    where
        F: Fn(Arc<dyn CacheTier>) -> Fut,
        Fut: std::future::Future<Output = Result<(), CacheError>>,
    {
        if self.tiers.is_empty() {
            return Err(CacheError::AllTiersFailed(
                "no cache tiers configured".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for tier in &self.tiers {
            if let Err(e) = op(Arc::clone(tier)).await {
                tracing::warn!(tier = tier.name(), key, error = %e, "Cache tier write failed");
                failures.push(e.to_string());
            }
        }

        if failures.len() == self.tiers.len() {
            return Err(CacheError::AllTiersFailed(failures.join("; ")));
        }
        Ok(())
    }
}
