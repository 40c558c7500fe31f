//! MFA verification keeps working while the audit trail cannot be written.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use common::{create_user_in, totp_code};
use warden::{Error, JwtConfig, MemoryRepositoryProvider, RepositoryProvider, UserId, WardenBuilder};
use warden_core::{
    error::StorageError,
    mfa::{ClientInfo, MfaAuditEntry},
    repositories::{
        LockoutRepositoryProvider, LoginAttemptRepositoryProvider, MfaAuditRepository,
        MfaRepositoryProvider, Page, PageRequest, SessionRepositoryProvider,
        SettingsRepositoryProvider, UserRepositoryProvider,
    },
};
use warden_storage_memory::{
    MemoryBackupCodeRepository, MemoryEmailOtpRepository, MemoryLockoutRepository,
    MemoryLoginAttemptRepository, MemoryMfaSettingsRepository, MemorySessionRepository,
    MemorySettingsRepository, MemoryUserRepository,
};

#[derive(Default)]
struct OfflineAudit {
    writes: AtomicUsize,
}

#[async_trait]
impl MfaAuditRepository for OfflineAudit {
    async fn append(&self, _entry: MfaAuditEntry) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("audit store offline".to_string()).into())
    }

    async fn find_for_user(
        &self,
        _user_id: &UserId,
        _page: PageRequest,
    ) -> Result<Page<MfaAuditEntry>, Error> {
        Err(StorageError::Unavailable("audit store offline".to_string()).into())
    }
}

/// Memory storage with the audit trail swapped for one that always fails.
#[derive(Default)]
struct AuditOutage {
    inner: MemoryRepositoryProvider,
    audit: OfflineAudit,
}

impl UserRepositoryProvider for AuditOutage {
    type UserRepo = MemoryUserRepository;

    fn user(&self) -> &Self::UserRepo {
        self.inner.user()
    }
}

impl LoginAttemptRepositoryProvider for AuditOutage {
    type LoginAttemptRepo = MemoryLoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        self.inner.login_attempt()
    }
}

impl LockoutRepositoryProvider for AuditOutage {
    type LockoutRepo = MemoryLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        self.inner.lockout()
    }
}

impl SettingsRepositoryProvider for AuditOutage {
    type SettingsRepo = MemorySettingsRepository;

    fn settings(&self) -> &Self::SettingsRepo {
        self.inner.settings()
    }
}

impl MfaRepositoryProvider for AuditOutage {
    type MfaSettingsRepo = MemoryMfaSettingsRepository;
    type BackupCodeRepo = MemoryBackupCodeRepository;
    type EmailOtpRepo = MemoryEmailOtpRepository;
    type MfaAuditRepo = OfflineAudit;

    fn mfa_settings(&self) -> &Self::MfaSettingsRepo {
        self.inner.mfa_settings()
    }

    fn backup_codes(&self) -> &Self::BackupCodeRepo {
        self.inner.backup_codes()
    }

    fn email_otps(&self) -> &Self::EmailOtpRepo {
        self.inner.email_otps()
    }

    fn mfa_audit(&self) -> &Self::MfaAuditRepo {
        &self.audit
    }
}

impl SessionRepositoryProvider for AuditOutage {
    type SessionRepo = MemorySessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        self.inner.session()
    }
}

#[async_trait]
impl RepositoryProvider for AuditOutage {
    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn test_verification_results_survive_audit_failures() {
    common::init_tracing();
    let storage = Arc::new(AuditOutage::default());
    let warden = WardenBuilder::new()
        .with_repositories(storage.clone())
        .with_jwt_config(JwtConfig::new_hs256(
            b"audit-outage-secret-with-32-bytes!!".to_vec(),
        ))
        .build()
        .await
        .unwrap();
    let user = create_user_in(storage.user(), "alice").await;
    let client = ClientInfo::new("198.51.100.10", None);

    let enrollment = warden.mfa().setup_totp(&user.id).await.unwrap();
    let (_, batch) = warden
        .mfa()
        .enable_mfa(&user.id, &totp_code(&enrollment.secret), &client)
        .await
        .unwrap();

    assert!(
        warden
            .mfa()
            .verify_totp(&user.id, &totp_code(&enrollment.secret), &client)
            .await
            .unwrap()
    );
    assert!(
        !warden
            .mfa()
            .verify_totp(&user.id, "12345x", &client)
            .await
            .unwrap()
    );
    assert!(
        warden
            .mfa()
            .verify_backup_code(&user.id, &batch.codes[0], &client)
            .await
            .unwrap()
    );
    assert!(
        !warden
            .mfa()
            .verify_backup_code(&user.id, &batch.codes[0], &client)
            .await
            .unwrap()
    );

    // Every one of those tried to write an audit entry
    assert!(storage.audit.writes.load(Ordering::SeqCst) >= 4);
}
