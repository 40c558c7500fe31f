//! Builder pattern for constructing Warden instances
//!
//! Storage has to be chosen before anything can be built. The type-state markers
//! [`NoStorage`] and [`WithStorage`] enforce that at compile time.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden::{JwtConfig, SecuritySettings, WardenBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warden = WardenBuilder::new()
//!         .with_memory_storage()
//!         .with_jwt_config(JwtConfig::new_hs256(b"a-very-long-development-only-secret".to_vec()))
//!         .with_security_settings(SecuritySettings::default().with_max_failed_attempts(3))
//!         .build()
//!         .await?;
//!
//!     warden.health_check().await?;
//!     Ok(())
//! }
//! ```

use std::{sync::Arc, time::Duration as StdDuration};

use warden_core::{
    RepositoryProvider,
    cache::TieredCache,
    crypto::SecretCipher,
    error::utilities::RequiredFieldExt,
    events::{EventBus, EventHandler},
    mailer::{EmailSender, TracingEmailSender},
    services::MfaConfig,
    settings::SecuritySettings,
    token::JwtConfig,
};

use crate::{Components, Warden, config::DEFAULT_CLEANUP_INTERVAL, config::WardenConfig};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Warden instance.
#[derive(Debug, thiserror::Error)]
pub enum WardenBuilderError {
    /// The storage backend failed its health check
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A required setting was never provided
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`WardenBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Warden`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
///
/// A JWT configuration is the only other required setting.
pub struct WardenBuilder<Storage> {
    storage: Storage,
    options: Options,
}

struct Options {
    jwt: Option<JwtConfig>,
    security_settings: SecuritySettings,
    mfa_config: MfaConfig,
    cipher: Option<SecretCipher>,
    mailer: Option<Arc<dyn EmailSender>>,
    cache: Option<TieredCache>,
    event_handlers: Vec<Arc<dyn EventHandler>>,
    cleanup_interval: StdDuration,
}

impl Default for WardenBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl WardenBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Security settings: [`SecuritySettings::default`]
    /// - MFA: [`MfaConfig::default`]
    /// - Mailer: logs instead of delivering
    /// - Cache: a single in-process tier
    /// - Cleanup interval: one hour
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            options: Options {
                jwt: None,
                security_settings: SecuritySettings::default(),
                mfa_config: MfaConfig::default(),
                cipher: None,
                mailer: None,
                cache: None,
                event_handlers: Vec::new(),
                cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            },
        }
    }

    // ============================================================================
    // Storage Configuration Methods (NoStorage -> WithStorage)
    // ============================================================================

    /// Use an already constructed repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> WardenBuilder<WithStorage<R>> {
        WardenBuilder {
            storage: WithStorage { repositories },
            options: self.options,
        }
    }

    /// Keep all security state in process memory.
    #[cfg(feature = "memory")]
    pub fn with_memory_storage(
        self,
    ) -> WardenBuilder<WithStorage<warden_storage_memory::MemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(
            warden_storage_memory::MemoryRepositoryProvider::new(),
        ))
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: RepositoryProvider> WardenBuilder<WithStorage<R>> {
    pub fn with_jwt_config(mut self, config: JwtConfig) -> Self {
        self.options.jwt = Some(config);
        self
    }

    /// Global defaults used until an administrator stores different ones.
    pub fn with_security_settings(mut self, settings: SecuritySettings) -> Self {
        self.options.security_settings = settings;
        self
    }

    pub fn with_mfa_config(mut self, config: MfaConfig) -> Self {
        self.options.mfa_config = config;
        self
    }

    /// Cipher sealing TOTP secrets at rest.
    pub fn with_secret_cipher(mut self, cipher: SecretCipher) -> Self {
        self.options.cipher = Some(cipher);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn EmailSender>) -> Self {
        self.options.mailer = Some(mailer);
        self
    }

    /// Cache used for the token blacklist, OTP verification state, MFA challenges and the key set.
    pub fn with_cache(mut self, cache: TieredCache) -> Self {
        self.options.cache = Some(cache);
        self
    }

    /// Receive security events. May be called more than once.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.options.event_handlers.push(handler);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: StdDuration) -> Self {
        self.options.cleanup_interval = interval;
        self
    }

    /// Apply settings loaded with [`WardenConfig::from_env`].
    pub fn with_config(mut self, config: WardenConfig) -> Self {
        self.options.jwt = Some(config.jwt);
        if let Some(issuer) = config.totp_issuer {
            self.options.mfa_config.issuer = issuer;
        }
        if let Some(cipher) = config.encryption_key {
            self.options.cipher = Some(cipher);
        }
        self.options.cleanup_interval = config.cleanup_interval;
        self
    }

    /// Build the Warden instance.
    ///
    /// Validates the configuration, checks the storage backend is reachable and stores the
    /// global security settings if none exist yet.
    pub async fn build(self) -> Result<Warden<R>, WardenBuilderError> {
        let repositories = self.storage.repositories;
        let options = self.options;

        let jwt = options
            .jwt
            .require_field("JWT configuration")
            .map_err(|e| WardenBuilderError::MissingConfiguration(e.to_string()))?;
        options
            .security_settings
            .validate()
            .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))?;
        if options.cleanup_interval.is_zero() {
            return Err(WardenBuilderError::InvalidConfiguration(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }

        repositories
            .health_check()
            .await
            .map_err(|e| WardenBuilderError::StorageConnection(e.to_string()))?;

        let cipher = options.cipher.unwrap_or_else(|| {
            tracing::warn!(
                "No TOTP encryption key configured, using an ephemeral key. \
                 MFA enrollments will not survive a restart"
            );
            SecretCipher::random()
        });

        let events = EventBus::new();
        for handler in options.event_handlers {
            events.register(handler).await;
        }

        let warden = Warden::from_components(Components {
            repositories,
            jwt,
            security_defaults: options.security_settings,
            mfa_config: options.mfa_config,
            cipher,
            mailer: options
                .mailer
                .unwrap_or_else(|| Arc::new(TracingEmailSender)),
            cache: options.cache.unwrap_or_else(TieredCache::in_memory),
            events,
            cleanup_interval: options.cleanup_interval,
        });

        warden
            .settings()
            .global()
            .await
            .map_err(|e| WardenBuilderError::StorageConnection(e.to_string()))?;

        tracing::debug!("Warden instance built");
        Ok(warden)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;

    fn jwt() -> JwtConfig {
        JwtConfig::new_hs256(b"builder-test-secret-at-least-32-bytes!".to_vec())
    }

    #[tokio::test]
    async fn test_build_with_memory_storage() {
        let warden = WardenBuilder::new()
            .with_memory_storage()
            .with_jwt_config(jwt())
            .build()
            .await
            .unwrap();

        assert!(warden.health_check().await.is_ok());
        let global = warden.settings().global().await.unwrap();
        assert_eq!(global.max_failed_attempts, 5);
    }

    #[tokio::test]
    async fn test_missing_jwt_config() {
        let result = WardenBuilder::new().with_memory_storage().build().await;
        assert!(matches!(
            result,
            Err(WardenBuilderError::MissingConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_security_settings() {
        let mut settings = SecuritySettings::default();
        settings.max_failed_attempts = 0;

        let result = WardenBuilder::new()
            .with_memory_storage()
            .with_jwt_config(jwt())
            .with_security_settings(settings)
            .build()
            .await;
        assert!(matches!(
            result,
            Err(WardenBuilderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval() {
        let result = WardenBuilder::new()
            .with_memory_storage()
            .with_jwt_config(jwt())
            .with_cleanup_interval(StdDuration::ZERO)
            .build()
            .await;
        assert!(matches!(
            result,
            Err(WardenBuilderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_with_config_sets_totp_issuer() {
        let mut config = WardenConfig::new(jwt());
        config.totp_issuer = Some("Example Corp".to_string());

        let warden = WardenBuilder::new()
            .with_memory_storage()
            .with_config(config)
            .build()
            .await
            .unwrap();
        assert_eq!(warden.mfa().config().issuer, "Example Corp");
    }
}
