//! Multi-factor authentication: TOTP enrollment and verification, backup codes,
//! email one-time passwords and account recovery.
//!
//! Every verification and state change appends an [`MfaAuditEntry`]. Audit writes are
//! best effort and never change the outcome of the operation they describe.
//!
//! Secrets and codes are never stored in plaintext. The TOTP secret is sealed with the
//! [`SecretCipher`], bound to the owning user id. Backup codes, email OTPs and recovery
//! tokens are stored as SHA-256 hashes and compared in constant time.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error, User, UserId,
    cache::TieredCache,
    crypto::{self, SecretCipher},
    error::{AuthError, MfaError, utilities::BestEffortExt},
    events::{EventBus, SecurityEvent},
    id::{BackupCodeBatchId, BackupCodeId, EmailOtpId, SessionId},
    mailer::{EmailSender, MFA_OTP_TEMPLATE},
    mfa::{
        BackupCode, BackupCodeBatch, ClientInfo, EmailOtp, MfaAction, MfaAuditEntry, MfaMethod,
        MfaSettings, MfaState, MfaStatus, TotpEnrollment,
    },
    repositories::{
        BackupCodeRepository, EmailOtpRepository, MfaAuditRepository, MfaRepositoryProvider,
        MfaSettingsRepository, Page, PageRequest, UserRepository, UserRepositoryProvider,
    },
    totp::{TotpConfig, TotpGenerator, format_secret_for_backup},
};

/// Unambiguous characters used for backup codes (no 0/O or 1/I).
pub const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Characters in a backup code, excluding the separator.
pub const BACKUP_CODE_LEN: usize = 10;

/// Remaining backup codes at or below which a warning is logged.
const LOW_BACKUP_CODES: u64 = 2;

const RECOVERY_KEY_PREFIX: &str = "mfa_recovery:";

/// Generate a backup code formatted as `XXXXX-XXXXX`.
pub fn generate_backup_code() -> String {
    let raw = crypto::random_code(BACKUP_CODE_ALPHABET, BACKUP_CODE_LEN);
    let (head, tail) = raw.split_at(BACKUP_CODE_LEN / 2);
    format!("{head}-{tail}")
}

/// Strip separators and whitespace and uppercase, so `abcde-fghjk` matches `ABCDEFGHJK`.
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    /// Issuer shown in authenticator apps
    pub issuer: String,
    pub backup_code_count: usize,
    pub backup_code_validity: Duration,
    pub email_otp_length: usize,
    pub email_otp_expiry: Duration,
    pub email_otp_max_attempts: u32,
    /// Email OTPs a user may request per purpose within `otp_send_window`
    pub otp_send_limit: u64,
    pub otp_send_window: Duration,
    pub recovery_token_lifetime: Duration,
    pub totp: TotpConfig,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            issuer: "Warden".to_string(),
            backup_code_count: 10,
            backup_code_validity: Duration::days(365),
            email_otp_length: 6,
            email_otp_expiry: Duration::minutes(10),
            email_otp_max_attempts: 3,
            otp_send_limit: 3,
            otp_send_window: Duration::minutes(15),
            recovery_token_lifetime: Duration::minutes(30),
            totp: TotpConfig::default(),
        }
    }
}

impl MfaConfig {
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    pub fn with_email_otp_expiry(mut self, expiry: Duration) -> Self {
        self.email_otp_expiry = expiry;
        self
    }

    pub fn with_email_otp_max_attempts(mut self, attempts: u32) -> Self {
        self.email_otp_max_attempts = attempts;
        self
    }

    pub fn with_otp_send_limit(mut self, limit: u64, window: Duration) -> Self {
        self.otp_send_limit = limit;
        self.otp_send_window = window;
        self
    }
}

/// Result of a completed recovery: a fresh TOTP secret and a fresh set of backup codes.
#[derive(Debug, Clone)]
pub struct MfaRecovery {
    pub enrollment: TotpEnrollment,
    pub backup_codes: BackupCodeBatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecoveryTicket {
    token_hash: String,
    reason: String,
    created_at: DateTime<Utc>,
}

pub struct MfaManager<R>
where
    R: MfaRepositoryProvider + UserRepositoryProvider,
{
    repository: Arc<R>,
    cipher: SecretCipher,
    totp: TotpGenerator,
    mailer: Arc<dyn EmailSender>,
    cache: TieredCache,
    events: EventBus,
    config: MfaConfig,
}

impl<R> MfaManager<R>
where
    R: MfaRepositoryProvider + UserRepositoryProvider,
{
    pub fn new(
        repository: Arc<R>,
        cipher: SecretCipher,
        mailer: Arc<dyn EmailSender>,
        cache: TieredCache,
        events: EventBus,
        config: MfaConfig,
    ) -> Self {
        Self {
            repository,
            cipher,
            totp: TotpGenerator::new(config.totp.clone()),
            mailer,
            cache,
            events,
            config,
        }
    }

    pub fn config(&self) -> &MfaConfig {
        &self.config
    }

    /// Start TOTP enrollment with a new secret. MFA is not enabled until
    /// [`MfaManager::enable_mfa`] confirms a code.
    pub async fn setup_totp(&self, user_id: &UserId) -> Result<TotpEnrollment, Error> {
        let user = self.require_user(user_id).await?;
        let mut settings = self
            .repository
            .mfa_settings()
            .find_by_user(user_id)
            .await?
            .unwrap_or_else(|| MfaSettings::new(user_id.clone()));

        if settings.is_enabled {
            return Err(MfaError::AlreadyEnabled.into());
        }

        let secret = self.totp.generate_secret();
        settings.encrypted_totp_secret = Some(self.cipher.encrypt(&secret, user_id.as_str())?);
        settings.updated_at = Utc::now();
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::TotpSetup, true)
                .with_method(MfaMethod::Totp)
                .with_settings(&settings.id),
        )
        .await;
        tracing::info!(user_id = %user_id, "Started TOTP setup");

        Ok(self.enrollment_for(&user, secret))
    }

    /// Check a code against the pending secret without changing any state.
    pub async fn verify_totp_setup(&self, user_id: &UserId, code: &str) -> Result<bool, Error> {
        let settings = self.require_settings(user_id).await?;
        let secret = self.totp_secret(&settings)?;
        Ok(self.totp.verify(&secret, code)?)
    }

    /// Confirm the pending secret with `code`, enable MFA and issue the first backup codes.
    pub async fn enable_mfa(
        &self,
        user_id: &UserId,
        code: &str,
        client: &ClientInfo,
    ) -> Result<(MfaSettings, BackupCodeBatch), Error> {
        let user = self.require_user(user_id).await?;
        let mut settings = self.require_settings(user_id).await?;
        if settings.is_enabled {
            return Err(MfaError::AlreadyEnabled.into());
        }

        let secret = self.totp_secret(&settings)?;
        if !self.totp.verify(&secret, code)? {
            self.audit(
                MfaAuditEntry::new(user_id.clone(), MfaAction::TotpFailed, false)
                    .with_method(MfaMethod::Totp)
                    .with_settings(&settings.id)
                    .with_client(client)
                    .with_failure("Invalid code while enabling MFA"),
            )
            .await;
            return Err(MfaError::InvalidCode.into());
        }

        let now = Utc::now();
        settings.is_enabled = true;
        settings.totp_enabled = true;
        settings.backup_codes_enabled = true;
        settings.email_otp_enabled = user.email.is_some();
        settings.enabled_at = Some(now);
        settings.disabled_at = None;
        settings.disabled_reason = None;
        settings.updated_at = now;

        let batch = self.issue_backup_codes(&mut settings).await?;
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::MfaEnabled, true)
                .with_method(MfaMethod::Totp)
                .with_settings(&settings.id)
                .with_client(client),
        )
        .await;
        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::BackupCodesGenerated, true)
                .with_method(MfaMethod::BackupCode)
                .with_settings(&settings.id)
                .with_details(serde_json::json!({ "count": batch.codes.len() })),
        )
        .await;
        self.events
            .emit(&SecurityEvent::MfaEnabled {
                user_id: user_id.clone(),
                timestamp: now,
            })
            .await;
        tracing::info!(user_id = %user_id, "MFA enabled");

        Ok((settings, batch))
    }

    /// Turn MFA off and discard the secret and backup codes.
    ///
    /// Idempotent for users without MFA. Fails with [`MfaError::Enforced`] when an
    /// administrator requires MFA for the user.
    pub async fn disable_mfa(
        &self,
        user_id: &UserId,
        reason: Option<String>,
        disabled_by: Option<&UserId>,
        client: &ClientInfo,
    ) -> Result<bool, Error> {
        let Some(mut settings) = self.repository.mfa_settings().find_by_user(user_id).await?
        else {
            return Ok(true);
        };

        if settings.enforced {
            self.audit(
                MfaAuditEntry::new(user_id.clone(), MfaAction::MfaDisabled, false)
                    .with_settings(&settings.id)
                    .with_client(client)
                    .with_failure("MFA is enforced"),
            )
            .await;
            return Err(MfaError::Enforced.into());
        }

        let was_enabled = settings.is_enabled;
        let now = Utc::now();
        settings.is_enabled = false;
        settings.totp_enabled = false;
        settings.email_otp_enabled = false;
        settings.backup_codes_enabled = false;
        settings.encrypted_totp_secret = None;
        settings.backup_codes_remaining = 0;
        settings.disabled_at = Some(now);
        settings.disabled_reason = reason.clone();
        settings.updated_at = now;

        self.repository
            .backup_codes()
            .soft_delete_for_user(user_id)
            .await?;
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::MfaDisabled, true)
                .with_settings(&settings.id)
                .with_client(client)
                .with_details(serde_json::json!({
                    "reason": reason,
                    "disabled_by": disabled_by.map(UserId::as_str),
                })),
        )
        .await;

        if was_enabled {
            self.events
                .emit(&SecurityEvent::MfaDisabled {
                    user_id: user_id.clone(),
                    reason,
                    timestamp: now,
                })
                .await;
            tracing::info!(user_id = %user_id, "MFA disabled");
        }

        Ok(true)
    }

    pub async fn verify_totp(
        &self,
        user_id: &UserId,
        code: &str,
        client: &ClientInfo,
    ) -> Result<bool, Error> {
        let settings = match self.repository.mfa_settings().find_by_user(user_id).await? {
            Some(settings) if settings.is_enabled && settings.totp_enabled => settings,
            _ => {
                self.audit(
                    MfaAuditEntry::new(user_id.clone(), MfaAction::TotpFailed, false)
                        .with_method(MfaMethod::Totp)
                        .with_client(client)
                        .with_failure("TOTP is not enabled"),
                )
                .await;
                return Ok(false);
            }
        };

        let checked = self
            .totp_secret(&settings)
            .and_then(|secret| Ok(self.totp.verify(&secret, code)?));
        let valid = match checked {
            Ok(valid) => valid,
            Err(e) => {
                self.audit(
                    MfaAuditEntry::new(user_id.clone(), MfaAction::TotpFailed, false)
                        .with_method(MfaMethod::Totp)
                        .with_settings(&settings.id)
                        .with_client(client)
                        .with_failure(e.to_string()),
                )
                .await;
                return Err(e);
            }
        };

        let action = if valid {
            MfaAction::TotpVerified
        } else {
            MfaAction::TotpFailed
        };
        let mut entry = MfaAuditEntry::new(user_id.clone(), action, valid)
            .with_method(MfaMethod::Totp)
            .with_settings(&settings.id)
            .with_client(client);
        if !valid {
            entry = entry.with_failure("Invalid TOTP code");
        }
        self.audit(entry).await;

        if valid {
            self.touch_last_used(settings).await;
        }
        Ok(valid)
    }

    /// Consume a backup code. Each code succeeds at most once.
    pub async fn verify_backup_code(
        &self,
        user_id: &UserId,
        code: &str,
        client: &ClientInfo,
    ) -> Result<bool, Error> {
        let settings = match self.repository.mfa_settings().find_by_user(user_id).await? {
            Some(settings) if settings.is_enabled && settings.backup_codes_enabled => settings,
            _ => {
                self.audit_backup_failure(user_id, client, "Backup codes are not enabled")
                    .await;
                return Ok(false);
            }
        };

        let normalized = normalize_backup_code(code);
        if normalized.len() != BACKUP_CODE_LEN {
            self.audit_backup_failure(user_id, client, "Malformed backup code")
                .await;
            return Ok(false);
        }

        let now = Utc::now();
        let candidates = self
            .repository
            .backup_codes()
            .find_usable_for_user(user_id, now)
            .await?;
        let Some(matched) = candidates
            .iter()
            .find(|candidate| crypto::verify_token_hash(&normalized, &candidate.code_hash))
        else {
            self.audit_backup_failure(user_id, client, "Invalid backup code")
                .await;
            return Ok(false);
        };

        let consumed = self
            .repository
            .backup_codes()
            .mark_used(
                &matched.id,
                client.ip_address.as_deref(),
                client.user_agent.as_deref(),
            )
            .await?;
        if !consumed {
            self.audit_backup_failure(user_id, client, "Backup code already used")
                .await;
            return Ok(false);
        }

        let remaining = self
            .repository
            .backup_codes()
            .count_usable_for_user(user_id, now)
            .await?;

        let mut settings = settings;
        settings.backup_codes_remaining = u32::try_from(remaining).unwrap_or(u32::MAX);
        settings.last_used_at = Some(now);
        settings.updated_at = now;
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::BackupCodeUsed, true)
                .with_method(MfaMethod::BackupCode)
                .with_settings(&settings.id)
                .with_client(client)
                .with_details(serde_json::json!({ "remaining": remaining })),
        )
        .await;

        if remaining <= LOW_BACKUP_CODES {
            tracing::warn!(user_id = %user_id, remaining, "User is running out of backup codes");
        }
        Ok(true)
    }

    /// Create and email a one-time password for `purpose`.
    ///
    /// Older unused codes for the same purpose stop working. Returns `false` when the
    /// user has no email address or delivery failed. Rate limiting is the caller's job,
    /// see [`MfaManager::get_recent_otp_attempts`].
    pub async fn send_email_otp(
        &self,
        user_id: &UserId,
        purpose: &str,
        session_id: Option<SessionId>,
    ) -> Result<bool, Error> {
        let user = self.require_user(user_id).await?;
        let Some(email) = user.email.clone() else {
            tracing::warn!(user_id = %user_id, "Cannot send email OTP, user has no email address");
            return Ok(false);
        };

        self.repository
            .email_otps()
            .soft_delete_unused(user_id, purpose)
            .await?;

        let now = Utc::now();
        let code = crypto::random_numeric_code(self.config.email_otp_length);
        let otp = self
            .repository
            .email_otps()
            .create(EmailOtp {
                id: EmailOtpId::new_random(),
                user_id: user_id.clone(),
                otp_hash: crypto::hash_token(&code),
                email_address: email.clone(),
                purpose: purpose.to_string(),
                used: false,
                used_at: None,
                used_from_ip: None,
                attempt_count: 0,
                max_attempts: self.config.email_otp_max_attempts,
                blocked: false,
                blocked_at: None,
                expires_at: now + self.config.email_otp_expiry,
                session_id,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let data = HashMap::from([
            ("FirstName".to_string(), user.display_name().to_string()),
            ("OtpCode".to_string(), code),
            (
                "ExpiryMinutes".to_string(),
                self.config.email_otp_expiry.num_minutes().to_string(),
            ),
            ("Purpose".to_string(), purpose.to_string()),
        ]);

        if let Err(e) = self
            .mailer
            .send_templated_email(&email, MFA_OTP_TEMPLATE, &data)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to deliver email OTP");
            self.repository
                .email_otps()
                .block(&otp.id)
                .await
                .best_effort("block undelivered email OTP");
            self.audit(
                MfaAuditEntry::new(user_id.clone(), MfaAction::EmailOtpSent, false)
                    .with_method(MfaMethod::EmailOtp)
                    .with_failure(e.to_string()),
            )
            .await;
            return Ok(false);
        }

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::EmailOtpSent, true)
                .with_method(MfaMethod::EmailOtp)
                .with_details(serde_json::json!({ "purpose": purpose })),
        )
        .await;
        tracing::debug!(user_id = %user_id, purpose, "Sent email OTP");
        Ok(true)
    }

    /// Check an email OTP.
    ///
    /// Every call counts as an attempt. Once the attempts exceed the code's maximum the
    /// code is blocked and fails even when correct.
    pub async fn verify_email_otp(
        &self,
        user_id: &UserId,
        code: &str,
        purpose: &str,
        client: &ClientInfo,
    ) -> Result<bool, Error> {
        let now = Utc::now();
        let Some(otp) = self
            .repository
            .email_otps()
            .find_usable(user_id, purpose, now)
            .await?
        else {
            self.audit_email_failure(user_id, client, "No active code").await;
            return Ok(false);
        };

        let Some(otp) = self.repository.email_otps().record_attempt(&otp.id).await? else {
            self.audit_email_failure(user_id, client, "No active code").await;
            return Ok(false);
        };

        if otp.attempts_exhausted() {
            self.repository.email_otps().block(&otp.id).await?;
            tracing::warn!(user_id = %user_id, purpose, "Email OTP blocked after too many attempts");
            self.audit_email_failure(user_id, client, "Too many attempts").await;
            return Ok(false);
        }

        if !otp.is_usable_at(now) {
            self.audit_email_failure(user_id, client, "Code is no longer valid")
                .await;
            return Ok(false);
        }

        if !crypto::verify_token_hash(code.trim(), &otp.otp_hash) {
            self.audit_email_failure(user_id, client, "Invalid code").await;
            return Ok(false);
        }

        if !self
            .repository
            .email_otps()
            .mark_used(&otp.id, client.ip_address.as_deref())
            .await?
        {
            self.audit_email_failure(user_id, client, "Code already used").await;
            return Ok(false);
        }

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::EmailOtpVerified, true)
                .with_method(MfaMethod::EmailOtp)
                .with_client(client),
        )
        .await;

        if let Some(settings) = self
            .repository
            .mfa_settings()
            .find_by_user(user_id)
            .await
            .best_effort("load MFA settings")
            .flatten()
        {
            self.touch_last_used(settings).await;
        }
        Ok(true)
    }

    /// Email OTPs created for the user and purpose within `window`, deleted ones included.
    pub async fn get_recent_otp_attempts(
        &self,
        user_id: &UserId,
        purpose: &str,
        window: Duration,
    ) -> Result<u64, Error> {
        self.repository
            .email_otps()
            .count_created_since(user_id, purpose, Utc::now() - window)
            .await
    }

    pub async fn status(&self, user_id: &UserId) -> Result<MfaStatus, Error> {
        let status = match self.repository.mfa_settings().find_by_user(user_id).await? {
            Some(settings) => MfaStatus {
                state: settings.state(),
                enforced: settings.enforced,
                methods: settings.available_methods(),
                backup_codes_remaining: settings.backup_codes_remaining,
                enabled_at: settings.enabled_at,
                last_used_at: settings.last_used_at,
            },
            None => MfaStatus {
                state: MfaState::Unset,
                enforced: false,
                methods: Vec::new(),
                backup_codes_remaining: 0,
                enabled_at: None,
                last_used_at: None,
            },
        };
        Ok(status)
    }

    pub async fn is_enabled(&self, user_id: &UserId) -> Result<bool, Error> {
        Ok(self
            .repository
            .mfa_settings()
            .find_by_user(user_id)
            .await?
            .is_some_and(|s| s.is_enabled))
    }

    pub async fn is_enforced(&self, user_id: &UserId) -> Result<bool, Error> {
        Ok(self
            .repository
            .mfa_settings()
            .find_by_user(user_id)
            .await?
            .is_some_and(|s| s.enforced))
    }

    /// Require (or stop requiring) MFA for a user.
    pub async fn set_enforced(
        &self,
        user_id: &UserId,
        enforced: bool,
        grace_end: Option<DateTime<Utc>>,
        changed_by: Option<&UserId>,
    ) -> Result<MfaSettings, Error> {
        let mut settings = self
            .repository
            .mfa_settings()
            .find_by_user(user_id)
            .await?
            .unwrap_or_else(|| MfaSettings::new(user_id.clone()));

        settings.enforced = enforced;
        settings.enforcement_grace_end = if enforced { grace_end } else { None };
        settings.updated_at = Utc::now();
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::EnforcementChanged, true)
                .with_settings(&settings.id)
                .with_details(serde_json::json!({
                    "enforced": enforced,
                    "changed_by": changed_by.map(UserId::as_str),
                })),
        )
        .await;
        tracing::info!(user_id = %user_id, enforced, "Changed MFA enforcement");
        Ok(settings)
    }

    /// Replace every backup code with a new batch.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: &UserId,
        client: &ClientInfo,
    ) -> Result<BackupCodeBatch, Error> {
        let mut settings = self.require_settings(user_id).await?;
        if !settings.is_enabled {
            return Err(MfaError::NotEnabled.into());
        }

        settings.backup_codes_enabled = true;
        let batch = self.issue_backup_codes(&mut settings).await?;
        settings.updated_at = Utc::now();
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::BackupCodesGenerated, true)
                .with_method(MfaMethod::BackupCode)
                .with_settings(&settings.id)
                .with_client(client)
                .with_details(serde_json::json!({ "count": batch.codes.len() })),
        )
        .await;
        tracing::info!(user_id = %user_id, "Regenerated backup codes");
        Ok(batch)
    }

    pub async fn remaining_backup_codes(&self, user_id: &UserId) -> Result<u64, Error> {
        self.repository
            .backup_codes()
            .count_usable_for_user(user_id, Utc::now())
            .await
    }

    /// Issue a recovery token for a user who lost their second factor.
    ///
    /// Only the token hash is kept, in the cache, for `recovery_token_lifetime`. A new
    /// request replaces any outstanding token.
    pub async fn initiate_recovery(
        &self,
        user_id: &UserId,
        reason: &str,
        client: &ClientInfo,
    ) -> Result<String, Error> {
        let settings = self.require_settings(user_id).await?;
        if !settings.is_enabled {
            return Err(MfaError::NotEnabled.into());
        }

        let token = crypto::generate_secure_token(32);
        let ticket = RecoveryTicket {
            token_hash: crypto::hash_token(&token),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        let ttl = self
            .config
            .recovery_token_lifetime
            .to_std()
            .unwrap_or_default();
        self.cache
            .set(&recovery_key(user_id), &ticket, ttl)
            .await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::MfaRecoveryInitiated, true)
                .with_settings(&settings.id)
                .with_client(client)
                .with_details(serde_json::json!({ "reason": reason })),
        )
        .await;
        tracing::warn!(user_id = %user_id, "MFA recovery initiated");
        Ok(token)
    }

    /// Redeem a recovery token: rotate the TOTP secret and replace the backup codes.
    pub async fn complete_recovery(
        &self,
        user_id: &UserId,
        token: &str,
        client: &ClientInfo,
    ) -> Result<MfaRecovery, Error> {
        let key = recovery_key(user_id);
        let ticket: Option<RecoveryTicket> = self.cache.get(&key).await?;
        let Some(ticket) = ticket.filter(|t| crypto::verify_token_hash(token, &t.token_hash))
        else {
            self.audit(
                MfaAuditEntry::new(user_id.clone(), MfaAction::MfaRecoveryCompleted, false)
                    .with_client(client)
                    .with_failure("Invalid or expired recovery token"),
            )
            .await;
            return Err(MfaError::InvalidRecoveryToken.into());
        };
        self.cache.remove(&key).await?;

        let user = self.require_user(user_id).await?;
        let mut settings = self.require_settings(user_id).await?;

        let secret = self.totp.generate_secret();
        settings.encrypted_totp_secret = Some(self.cipher.encrypt(&secret, user_id.as_str())?);
        settings.totp_enabled = true;
        settings.backup_codes_enabled = true;
        let backup_codes = self.issue_backup_codes(&mut settings).await?;
        settings.updated_at = Utc::now();
        let settings = self.repository.mfa_settings().upsert(settings).await?;

        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::MfaRecoveryCompleted, true)
                .with_settings(&settings.id)
                .with_client(client)
                .with_details(serde_json::json!({ "reason": ticket.reason })),
        )
        .await;
        tracing::warn!(user_id = %user_id, "MFA recovery completed, secret rotated");

        Ok(MfaRecovery {
            enrollment: self.enrollment_for(&user, secret),
            backup_codes,
        })
    }

    /// Newest first.
    pub async fn audit_log(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<MfaAuditEntry>, Error> {
        self.repository.mfa_audit().find_for_user(user_id, page).await
    }

    pub async fn cleanup_expired_otps(&self) -> Result<u64, Error> {
        let deleted = self
            .repository
            .email_otps()
            .delete_expired(Utc::now())
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "Cleaned up expired email OTPs");
        }
        Ok(deleted)
    }

    async fn issue_backup_codes(
        &self,
        settings: &mut MfaSettings,
    ) -> Result<BackupCodeBatch, Error> {
        self.repository
            .backup_codes()
            .soft_delete_for_user(&settings.user_id)
            .await?;

        let now = Utc::now();
        let batch_id = BackupCodeBatchId::new_random();
        let expires_at = now + self.config.backup_code_validity;
        let codes: Vec<String> = (0..self.config.backup_code_count)
            .map(|_| generate_backup_code())
            .collect();

        let records = codes
            .iter()
            .map(|code| BackupCode {
                id: BackupCodeId::new_random(),
                user_id: settings.user_id.clone(),
                mfa_settings_id: settings.id.clone(),
                batch_id: batch_id.clone(),
                code_hash: crypto::hash_token(&normalize_backup_code(code)),
                used: false,
                used_at: None,
                used_from_ip: None,
                used_from_user_agent: None,
                expires_at,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.repository.backup_codes().create_batch(records).await?;

        settings.backup_codes_remaining = u32::try_from(codes.len()).unwrap_or(u32::MAX);
        Ok(BackupCodeBatch {
            batch_id,
            codes,
            expires_at,
        })
    }

    fn enrollment_for(&self, user: &User, secret: String) -> TotpEnrollment {
        let account = user.email.as_deref().unwrap_or(&user.username);
        TotpEnrollment {
            provisioning_uri: self
                .totp
                .provisioning_uri(&secret, &self.config.issuer, account),
            backup_formatted_secret: format_secret_for_backup(&secret),
            secret,
        }
    }

    fn totp_secret(&self, settings: &MfaSettings) -> Result<String, Error> {
        let sealed = settings
            .encrypted_totp_secret
            .as_deref()
            .ok_or(MfaError::SetupRequired)?;
        Ok(self.cipher.decrypt(sealed, settings.user_id.as_str())?)
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, Error> {
        self.repository
            .user()
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }

    async fn require_settings(&self, user_id: &UserId) -> Result<MfaSettings, Error> {
        self.repository
            .mfa_settings()
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| MfaError::NotConfigured.into())
    }

    async fn touch_last_used(&self, mut settings: MfaSettings) {
        let now = Utc::now();
        settings.last_used_at = Some(now);
        settings.updated_at = now;
        self.repository
            .mfa_settings()
            .upsert(settings)
            .await
            .best_effort("record MFA last use");
    }

    async fn audit(&self, entry: MfaAuditEntry) {
        self.repository
            .mfa_audit()
            .append(entry)
            .await
            .best_effort("append MFA audit entry");
    }

    async fn audit_backup_failure(&self, user_id: &UserId, client: &ClientInfo, reason: &str) {
        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::BackupCodeFailed, false)
                .with_method(MfaMethod::BackupCode)
                .with_client(client)
                .with_failure(reason),
        )
        .await;
    }

    async fn audit_email_failure(&self, user_id: &UserId, client: &ClientInfo, reason: &str) {
        self.audit(
            MfaAuditEntry::new(user_id.clone(), MfaAction::EmailOtpFailed, false)
                .with_method(MfaMethod::EmailOtp)
                .with_client(client)
                .with_failure(reason),
        )
        .await;
    }
}

fn recovery_key(user_id: &UserId) -> String {
    format!("{RECOVERY_KEY_PREFIX}{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_backup_code_format() {
        let code = generate_backup_code();
        assert_eq!(code.len(), BACKUP_CODE_LEN + 1);
        assert_eq!(code.as_bytes()[5], b'-');
        assert!(
            code.bytes()
                .filter(|b| *b != b'-')
                .all(|b| BACKUP_CODE_ALPHABET.contains(&b))
        );
    }

    #[test]
    fn test_backup_codes_are_distinct() {
        let codes: HashSet<String> = (0..50).map(|_| generate_backup_code()).collect();
        assert_eq!(codes.len(), 50);
    }

    #[test]
    fn test_normalize_backup_code() {
        assert_eq!(normalize_backup_code("abcde-fghjk"), "ABCDEFGHJK");
        assert_eq!(normalize_backup_code(" ABCDE FGHJK "), "ABCDEFGHJK");
        assert_eq!(
            normalize_backup_code(&generate_backup_code()).len(),
            BACKUP_CODE_LEN
        );
    }

    #[test]
    fn test_alphabet_is_unambiguous() {
        for ambiguous in [b'0', b'O', b'1', b'I'] {
            assert!(!BACKUP_CODE_ALPHABET.contains(&ambiguous));
        }
        assert_eq!(BACKUP_CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn test_default_config() {
        let config = MfaConfig::default();
        assert_eq!(config.backup_code_count, 10);
        assert_eq!(config.email_otp_length, 6);
        assert_eq!(config.email_otp_expiry, Duration::minutes(10));
        assert_eq!(config.email_otp_max_attempts, 3);
        assert_eq!(config.otp_send_limit, 3);
        assert_eq!(config.recovery_token_lifetime, Duration::minutes(30));
    }

    #[test]
    fn test_recovery_key() {
        assert_eq!(
            recovery_key(&UserId::new("usr_abc")),
            "mfa_recovery:usr_abc"
        );
    }
}
