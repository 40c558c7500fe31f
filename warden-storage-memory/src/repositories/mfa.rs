//! In-memory MFA repositories: settings, backup codes, email OTPs and the audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use warden_core::{
    Error, UserId,
    id::{BackupCodeId, EmailOtpId},
    mfa::{BackupCode, EmailOtp, MfaAuditEntry, MfaSettings},
    repositories::{
        BackupCodeRepository, EmailOtpRepository, MfaAuditRepository, MfaSettingsRepository,
        Page, PageRequest,
    },
};

#[derive(Default)]
pub struct MemoryMfaSettingsRepository {
    settings: DashMap<UserId, MfaSettings>,
}

impl MemoryMfaSettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaSettingsRepository for MemoryMfaSettingsRepository {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<MfaSettings>, Error> {
        Ok(self.settings.get(user_id).map(|settings| settings.clone()))
    }

    async fn upsert(&self, settings: MfaSettings) -> Result<MfaSettings, Error> {
        self.settings
            .insert(settings.user_id.clone(), settings.clone());
        Ok(settings)
    }
}

#[derive(Default)]
pub struct MemoryBackupCodeRepository {
    codes: DashMap<BackupCodeId, BackupCode>,
}

impl MemoryBackupCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupCodeRepository for MemoryBackupCodeRepository {
    async fn create_batch(&self, codes: Vec<BackupCode>) -> Result<Vec<BackupCode>, Error> {
        for code in &codes {
            self.codes.insert(code.id.clone(), code.clone());
        }
        Ok(codes)
    }

    async fn find_usable_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BackupCode>, Error> {
        Ok(self
            .codes
            .iter()
            .filter(|code| &code.user_id == user_id && code.is_usable_at(now))
            .map(|code| code.value().clone())
            .collect())
    }

    async fn mark_used(
        &self,
        id: &BackupCodeId,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<bool, Error> {
        // The shard write lock held by get_mut makes the check and the update one step.
        let Some(mut code) = self.codes.get_mut(id) else {
            return Ok(false);
        };
        if code.used || code.is_deleted {
            return Ok(false);
        }

        let now = Utc::now();
        code.used = true;
        code.used_at = Some(now);
        code.used_from_ip = ip_address.map(str::to_string);
        code.used_from_user_agent = user_agent.map(str::to_string);
        code.updated_at = now;
        Ok(true)
    }

    async fn soft_delete_for_user(&self, user_id: &UserId) -> Result<u64, Error> {
        let now = Utc::now();
        let mut deleted = 0;
        for mut code in self.codes.iter_mut() {
            if &code.user_id == user_id && !code.is_deleted {
                code.is_deleted = true;
                code.updated_at = now;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count_usable_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self
            .codes
            .iter()
            .filter(|code| &code.user_id == user_id && code.is_usable_at(now))
            .count() as u64)
    }
}

#[derive(Default)]
pub struct MemoryEmailOtpRepository {
    otps: DashMap<EmailOtpId, EmailOtp>,
}

impl MemoryEmailOtpRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmailOtpRepository for MemoryEmailOtpRepository {
    async fn create(&self, otp: EmailOtp) -> Result<EmailOtp, Error> {
        self.otps.insert(otp.id.clone(), otp.clone());
        Ok(otp)
    }

    async fn find_usable(
        &self,
        user_id: &UserId,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmailOtp>, Error> {
        Ok(self
            .otps
            .iter()
            .filter(|otp| &otp.user_id == user_id && otp.purpose == purpose && otp.is_usable_at(now))
            .max_by_key(|otp| otp.created_at)
            .map(|otp| otp.value().clone()))
    }

    async fn record_attempt(&self, id: &EmailOtpId) -> Result<Option<EmailOtp>, Error> {
        Ok(self.otps.get_mut(id).map(|mut otp| {
            otp.attempt_count = otp.attempt_count.saturating_add(1);
            otp.updated_at = Utc::now();
            otp.clone()
        }))
    }

    async fn block(&self, id: &EmailOtpId) -> Result<(), Error> {
        if let Some(mut otp) = self.otps.get_mut(id) {
            let now = Utc::now();
            otp.blocked = true;
            otp.blocked_at = Some(now);
            otp.updated_at = now;
        }
        Ok(())
    }

    async fn mark_used(&self, id: &EmailOtpId, ip_address: Option<&str>) -> Result<bool, Error> {
        let Some(mut otp) = self.otps.get_mut(id) else {
            return Ok(false);
        };
        if otp.used || otp.blocked || otp.is_deleted {
            return Ok(false);
        }

        let now = Utc::now();
        otp.used = true;
        otp.used_at = Some(now);
        otp.used_from_ip = ip_address.map(str::to_string);
        otp.updated_at = now;
        Ok(true)
    }

    async fn soft_delete_unused(&self, user_id: &UserId, purpose: &str) -> Result<u64, Error> {
        let now = Utc::now();
        let mut deleted = 0;
        for mut otp in self.otps.iter_mut() {
            if &otp.user_id == user_id && otp.purpose == purpose && !otp.used && !otp.is_deleted {
                otp.is_deleted = true;
                otp.updated_at = now;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count_created_since(
        &self,
        user_id: &UserId,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self
            .otps
            .iter()
            .filter(|otp| {
                &otp.user_id == user_id && otp.purpose == purpose && otp.created_at >= since
            })
            .count() as u64)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let initial = self.otps.len();
        self.otps.retain(|_, otp| otp.expires_at >= before);
        Ok(initial.saturating_sub(self.otps.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryMfaAuditRepository {
    entries: DashMap<UserId, Vec<MfaAuditEntry>>,
}

impl MemoryMfaAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaAuditRepository for MemoryMfaAuditRepository {
    async fn append(&self, entry: MfaAuditEntry) -> Result<(), Error> {
        self.entries
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn find_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<MfaAuditEntry>, Error> {
        let mut entries = self
            .entries
            .get(user_id)
            .map(|entries| entries.clone())
            .unwrap_or_default();
        entries.reverse();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.created_at));
        Ok(Page::from_ordered(entries, page))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use warden_core::{
        id::{BackupCodeBatchId, MfaSettingsId},
        mfa::MfaAction,
    };

    use super::*;

    fn backup_code(user_id: &UserId) -> BackupCode {
        let now = Utc::now();
        BackupCode {
            id: BackupCodeId::new_random(),
            user_id: user_id.clone(),
            mfa_settings_id: MfaSettingsId::new_random(),
            batch_id: BackupCodeBatchId::new_random(),
            code_hash: "hash".to_string(),
            used: false,
            used_at: None,
            used_from_ip: None,
            used_from_user_agent: None,
            expires_at: now + Duration::days(365),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn email_otp(user_id: &UserId, purpose: &str) -> EmailOtp {
        let now = Utc::now();
        EmailOtp {
            id: EmailOtpId::new_random(),
            user_id: user_id.clone(),
            otp_hash: "hash".to_string(),
            email_address: "alice@example.com".to_string(),
            purpose: purpose.to_string(),
            used: false,
            used_at: None,
            used_from_ip: None,
            attempt_count: 0,
            max_attempts: 3,
            blocked: false,
            blocked_at: None,
            expires_at: now + Duration::minutes(10),
            session_id: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_settings_upsert_replaces() {
        let repo = MemoryMfaSettingsRepository::new();
        let user = UserId::new_random();
        assert!(repo.find_by_user(&user).await.unwrap().is_none());

        let mut settings = MfaSettings::new(user.clone());
        repo.upsert(settings.clone()).await.unwrap();
        settings.is_enabled = true;
        repo.upsert(settings).await.unwrap();

        assert!(repo.find_by_user(&user).await.unwrap().unwrap().is_enabled);
    }

    #[tokio::test]
    async fn test_backup_code_used_once_under_contention() {
        let repo = Arc::new(MemoryBackupCodeRepository::new());
        let user = UserId::new_random();
        let code = backup_code(&user);
        repo.create_batch(vec![code.clone()]).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                let id = code.id.clone();
                tokio::spawn(async move { repo.mark_used(&id, Some("10.0.0.1"), None).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(repo.count_usable_for_user(&user, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_backup_code_soft_delete() {
        let repo = MemoryBackupCodeRepository::new();
        let user = UserId::new_random();
        repo.create_batch(vec![backup_code(&user), backup_code(&user)])
            .await
            .unwrap();

        assert_eq!(repo.soft_delete_for_user(&user).await.unwrap(), 2);
        assert!(
            repo.find_usable_for_user(&user, Utc::now())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_email_otp_lifecycle() {
        let repo = MemoryEmailOtpRepository::new();
        let user = UserId::new_random();
        let otp = repo.create(email_otp(&user, "login")).await.unwrap();

        let found = repo.find_usable(&user, "login", Utc::now()).await.unwrap();
        assert_eq!(found.map(|o| o.id), Some(otp.id.clone()));
        assert!(
            repo.find_usable(&user, "reset", Utc::now())
                .await
                .unwrap()
                .is_none()
        );

        let updated = repo.record_attempt(&otp.id).await.unwrap().unwrap();
        assert_eq!(updated.attempt_count, 1);

        assert!(repo.mark_used(&otp.id, Some("10.0.0.1")).await.unwrap());
        assert!(!repo.mark_used(&otp.id, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_blocked_otp_cannot_be_used() {
        let repo = MemoryEmailOtpRepository::new();
        let user = UserId::new_random();
        let otp = repo.create(email_otp(&user, "login")).await.unwrap();

        repo.block(&otp.id).await.unwrap();
        assert!(!repo.mark_used(&otp.id, None).await.unwrap());
        assert!(
            repo.find_usable(&user, "login", Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_soft_deleted_otps_still_count_for_rate_limit() {
        let repo = MemoryEmailOtpRepository::new();
        let user = UserId::new_random();
        repo.create(email_otp(&user, "login")).await.unwrap();
        repo.create(email_otp(&user, "login")).await.unwrap();

        assert_eq!(repo.soft_delete_unused(&user, "login").await.unwrap(), 2);
        assert_eq!(
            repo.count_created_since(&user, "login", Utc::now() - Duration::minutes(15))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_delete_expired_otps() {
        let repo = MemoryEmailOtpRepository::new();
        let user = UserId::new_random();
        let mut stale = email_otp(&user, "login");
        stale.expires_at = Utc::now() - Duration::hours(1);
        repo.create(stale).await.unwrap();
        repo.create(email_otp(&user, "login")).await.unwrap();

        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_audit_newest_first() {
        let repo = MemoryMfaAuditRepository::new();
        let user = UserId::new_random();

        let mut older = MfaAuditEntry::new(user.clone(), MfaAction::TotpSetup, true);
        older.created_at = Utc::now() - Duration::minutes(5);
        repo.append(older).await.unwrap();
        repo.append(MfaAuditEntry::new(user.clone(), MfaAction::MfaEnabled, true))
            .await
            .unwrap();

        let page = repo
            .find_for_user(&user, PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].action, MfaAction::MfaEnabled);
        assert_eq!(page.items[1].action, MfaAction::TotpSetup);
    }
}
