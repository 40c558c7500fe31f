//! Repository traits for the persistence collaborator
//!
//! Services never touch storage directly. Each entity has a `*Repository` trait with the
//! typed queries the services need, and a `*RepositoryProvider` trait that hands out the
//! repository. [`RepositoryProvider`] combines them all for backends that store everything.
//!
//! # Trait Hierarchy
//!
//! - Individual `*Repository` traits define the operations for each data domain
//! - Individual `*RepositoryProvider` traits provide access to each repository type
//! - [`RepositoryProvider`] is a supertrait combining all provider traits plus a health check
//!
//! Every call is assumed transactional on its own. A few operations are conditional
//! writes ([`LockoutRepository::activate`], [`BackupCodeRepository::mark_used`],
//! [`EmailOtpRepository::record_attempt`]) so that backends able to run them atomically
//! close the read-decide-write races around lockouts and single-use codes.

pub mod attempt;
pub mod lockout;
pub mod mfa;
pub mod session;
pub mod settings;
pub mod user;

pub use attempt::LoginAttemptRepository;
pub use lockout::LockoutRepository;
pub use mfa::{BackupCodeRepository, EmailOtpRepository, MfaAuditRepository, MfaSettingsRepository};
pub use session::SessionRepository;
pub use settings::SecuritySettingsRepository;
pub use user::UserRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Largest page size a caller can request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl PageRequest {
    /// Out of range values are clamped: page to at least 1, size to 1..=100.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Cut one page out of an already ordered list.
    pub fn from_ordered(items: Vec<T>, request: PageRequest) -> Self {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(request.offset())
            .take(request.limit())
            .collect();
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1) as usize)
    }

    pub fn has_next(&self) -> bool {
        (self.page as usize) < self.total_pages()
    }
}

// ============================================================================
// Individual Repository Provider Traits
// ============================================================================

/// Provider trait for read access to user identity data.
pub trait UserRepositoryProvider: Send + Sync + 'static {
    type UserRepo: UserRepository;

    fn user(&self) -> &Self::UserRepo;
}

/// Provider trait for the login attempt log.
pub trait LoginAttemptRepositoryProvider: Send + Sync + 'static {
    type LoginAttemptRepo: LoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo;
}

/// Provider trait for lockout records.
pub trait LockoutRepositoryProvider: Send + Sync + 'static {
    type LockoutRepo: LockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo;
}

/// Provider trait for global and per-user security settings.
pub trait SettingsRepositoryProvider: Send + Sync + 'static {
    type SettingsRepo: SecuritySettingsRepository;

    fn settings(&self) -> &Self::SettingsRepo;
}

/// Provider trait for everything multi-factor: settings, backup codes, email OTPs and the audit trail.
pub trait MfaRepositoryProvider: Send + Sync + 'static {
    type MfaSettingsRepo: MfaSettingsRepository;
    type BackupCodeRepo: BackupCodeRepository;
    type EmailOtpRepo: EmailOtpRepository;
    type MfaAuditRepo: MfaAuditRepository;

    fn mfa_settings(&self) -> &Self::MfaSettingsRepo;

    fn backup_codes(&self) -> &Self::BackupCodeRepo;

    fn email_otps(&self) -> &Self::EmailOtpRepo;

    fn mfa_audit(&self) -> &Self::MfaAuditRepo;
}

/// Provider trait for sessions.
pub trait SessionRepositoryProvider: Send + Sync + 'static {
    type SessionRepo: SessionRepository;

    fn session(&self) -> &Self::SessionRepo;
}

// ============================================================================
// Unified Repository Provider Trait
// ============================================================================

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// 1. Implement each individual `*Repository` trait for your backend
/// 2. Implement each individual `*RepositoryProvider` trait
/// 3. Implement `RepositoryProvider` with `health_check()`
///
/// ```rust,ignore
/// use warden_core::repositories::*;
///
/// impl LockoutRepositoryProvider for MyStorage {
///     type LockoutRepo = MyLockoutRepository;
///     fn lockout(&self) -> &Self::LockoutRepo { &self.lockouts }
/// }
///
/// // ... implement other provider traits ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider:
    UserRepositoryProvider
    + LoginAttemptRepositoryProvider
    + LockoutRepositoryProvider
    + SettingsRepositoryProvider
    + MfaRepositoryProvider
    + SessionRepositoryProvider
{
    async fn health_check(&self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let request = PageRequest::new(0, 1000);
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, MAX_PAGE_SIZE);
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn test_page_from_ordered() {
        let page = Page::from_ordered((1..=45).collect::<Vec<_>>(), PageRequest::new(3, 20));
        assert_eq!(page.items, vec![41, 42, 43, 44, 45]);
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages(), 3);
        assert!(!page.has_next());

        let first = Page::from_ordered((1..=45).collect::<Vec<_>>(), PageRequest::new(1, 20));
        assert!(first.has_next());
    }
}
