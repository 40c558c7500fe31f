//! Repository traits for multi-factor authentication data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Page, PageRequest};
use crate::{
    Error, UserId,
    id::{BackupCodeId, EmailOtpId},
    mfa::{BackupCode, EmailOtp, MfaAuditEntry, MfaSettings},
};

/// One settings record per user.
#[async_trait]
pub trait MfaSettingsRepository: Send + Sync + 'static {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<MfaSettings>, Error>;

    /// Insert or replace the record for `settings.user_id`.
    async fn upsert(&self, settings: MfaSettings) -> Result<MfaSettings, Error>;
}

/// Hashed single-use backup codes.
#[async_trait]
pub trait BackupCodeRepository: Send + Sync + 'static {
    async fn create_batch(&self, codes: Vec<BackupCode>) -> Result<Vec<BackupCode>, Error>;

    /// Codes that are unused, not deleted and unexpired at `now`.
    async fn find_usable_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BackupCode>, Error>;

    /// Mark a code used if it still is unused.
    ///
    /// Returns `false` when another request consumed it first.
    async fn mark_used(
        &self,
        id: &BackupCodeId,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<bool, Error>;

    /// Soft-delete every code the user holds. Returns how many were deleted.
    async fn soft_delete_for_user(&self, user_id: &UserId) -> Result<u64, Error>;

    async fn count_usable_for_user(&self, user_id: &UserId, now: DateTime<Utc>)
    -> Result<u64, Error>;
}

/// Hashed email one-time passwords.
#[async_trait]
pub trait EmailOtpRepository: Send + Sync + 'static {
    async fn create(&self, otp: EmailOtp) -> Result<EmailOtp, Error>;

    /// The newest OTP for the user and purpose that is still usable at `now`.
    async fn find_usable(
        &self,
        user_id: &UserId,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmailOtp>, Error>;

    /// Increment the attempt counter and return the updated record.
    async fn record_attempt(&self, id: &EmailOtpId) -> Result<Option<EmailOtp>, Error>;

    /// Permanently block the OTP.
    async fn block(&self, id: &EmailOtpId) -> Result<(), Error>;

    /// Mark the OTP used if it is still unused and unblocked. Returns whether it was.
    async fn mark_used(&self, id: &EmailOtpId, ip_address: Option<&str>) -> Result<bool, Error>;

    /// Soft-delete unused OTPs for the user and purpose.
    async fn soft_delete_unused(&self, user_id: &UserId, purpose: &str) -> Result<u64, Error>;

    /// OTPs created at or after `since` for the user and purpose, deleted ones included.
    async fn count_created_since(
        &self,
        user_id: &UserId,
        purpose: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Delete OTPs that expired before `before`.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}

/// Append-only audit trail of MFA operations.
#[async_trait]
pub trait MfaAuditRepository: Send + Sync + 'static {
    async fn append(&self, entry: MfaAuditEntry) -> Result<(), Error>;

    /// The user's entries, newest first.
    async fn find_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<MfaAuditEntry>, Error>;
}
