//! Repository implementations for in-memory storage

pub mod attempt;
pub mod lockout;
pub mod mfa;
pub mod session;
pub mod settings;
pub mod user;

pub use attempt::MemoryLoginAttemptRepository;
pub use lockout::MemoryLockoutRepository;
pub use mfa::{
    MemoryBackupCodeRepository, MemoryEmailOtpRepository, MemoryMfaAuditRepository,
    MemoryMfaSettingsRepository,
};
pub use session::MemorySessionRepository;
pub use settings::MemorySettingsRepository;
pub use user::MemoryUserRepository;

use async_trait::async_trait;
use warden_core::{
    Error,
    repositories::{
        LockoutRepositoryProvider, LoginAttemptRepositoryProvider, MfaRepositoryProvider,
        RepositoryProvider, SessionRepositoryProvider, SettingsRepositoryProvider,
        UserRepositoryProvider,
    },
};

/// Repository provider implementation for in-memory storage
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
#[derive(Default)]
pub struct MemoryRepositoryProvider {
    user: MemoryUserRepository,
    login_attempt: MemoryLoginAttemptRepository,
    lockout: MemoryLockoutRepository,
    settings: MemorySettingsRepository,
    mfa_settings: MemoryMfaSettingsRepository,
    backup_codes: MemoryBackupCodeRepository,
    email_otps: MemoryEmailOtpRepository,
    mfa_audit: MemoryMfaAuditRepository,
    session: MemorySessionRepository,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

// Implement individual provider traits

impl UserRepositoryProvider for MemoryRepositoryProvider {
    type UserRepo = MemoryUserRepository;

    fn user(&self) -> &Self::UserRepo {
        &self.user
    }
}

impl LoginAttemptRepositoryProvider for MemoryRepositoryProvider {
    type LoginAttemptRepo = MemoryLoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        &self.login_attempt
    }
}

impl LockoutRepositoryProvider for MemoryRepositoryProvider {
    type LockoutRepo = MemoryLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        &self.lockout
    }
}

impl SettingsRepositoryProvider for MemoryRepositoryProvider {
    type SettingsRepo = MemorySettingsRepository;

    fn settings(&self) -> &Self::SettingsRepo {
        &self.settings
    }
}

impl MfaRepositoryProvider for MemoryRepositoryProvider {
    type MfaSettingsRepo = MemoryMfaSettingsRepository;
    type BackupCodeRepo = MemoryBackupCodeRepository;
    type EmailOtpRepo = MemoryEmailOtpRepository;
    type MfaAuditRepo = MemoryMfaAuditRepository;

    fn mfa_settings(&self) -> &Self::MfaSettingsRepo {
        &self.mfa_settings
    }

    fn backup_codes(&self) -> &Self::BackupCodeRepo {
        &self.backup_codes
    }

    fn email_otps(&self) -> &Self::EmailOtpRepo {
        &self.email_otps
    }

    fn mfa_audit(&self) -> &Self::MfaAuditRepo {
        &self.mfa_audit
    }
}

impl SessionRepositoryProvider for MemoryRepositoryProvider {
    type SessionRepo = MemorySessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.session
    }
}

// Implement the unified RepositoryProvider trait

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
