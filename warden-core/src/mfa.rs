//! Multi-factor authentication records
//!
//! [`MfaSettings`] is created on first TOTP setup and carries the encrypted shared
//! secret plus the enabled flags. Backup codes and email OTPs are stored only as hashes.
//! Every verification attempt lands in the append-only [`MfaAuditEntry`] trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{
    AuditEntryId, BackupCodeBatchId, BackupCodeId, EmailOtpId, MfaSettingsId, SessionId, UserId,
};

/// Purpose string used for second-factor email codes.
pub const MFA_OTP_PURPOSE: &str = "MFA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaSettings {
    pub id: MfaSettingsId,
    pub user_id: UserId,
    pub is_enabled: bool,
    pub totp_enabled: bool,
    pub email_otp_enabled: bool,
    pub backup_codes_enabled: bool,
    /// Sealed with [`SecretCipher`](crate::crypto::SecretCipher). Present while pending or enabled.
    pub encrypted_totp_secret: Option<String>,
    pub backup_codes_remaining: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
    pub enforced: bool,
    pub enforcement_grace_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MfaSettings {
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: MfaSettingsId::new_random(),
            user_id,
            is_enabled: false,
            totp_enabled: false,
            email_otp_enabled: false,
            backup_codes_enabled: false,
            encrypted_totp_secret: None,
            backup_codes_remaining: 0,
            last_used_at: None,
            enabled_at: None,
            disabled_at: None,
            disabled_reason: None,
            enforced: false,
            enforcement_grace_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> MfaState {
        if self.is_enabled {
            MfaState::Enabled
        } else if self.encrypted_totp_secret.is_some() {
            MfaState::TotpPending
        } else {
            MfaState::Disabled
        }
    }

    /// Methods a user can currently complete a second factor with.
    pub fn available_methods(&self) -> Vec<MfaMethod> {
        if !self.is_enabled {
            return Vec::new();
        }
        let mut methods = Vec::new();
        if self.totp_enabled {
            methods.push(MfaMethod::Totp);
        }
        if self.backup_codes_enabled && self.backup_codes_remaining > 0 {
            methods.push(MfaMethod::BackupCode);
        }
        if self.email_otp_enabled {
            methods.push(MfaMethod::EmailOtp);
        }
        methods
    }
}

/// Per-user enrollment state. `Enforced` is tracked separately on [`MfaSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaState {
    Unset,
    TotpPending,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    BackupCode,
    EmailOtp,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Totp => "totp",
            MfaMethod::BackupCode => "backup_code",
            MfaMethod::EmailOtp => "email_otp",
        }
    }
}

/// Snapshot returned by [`MfaManager::status`](crate::services::MfaManager::status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaStatus {
    pub state: MfaState,
    pub enforced: bool,
    pub methods: Vec<MfaMethod>,
    pub backup_codes_remaining: u32,
    pub enabled_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupCode {
    pub id: BackupCodeId,
    pub user_id: UserId,
    pub mfa_settings_id: MfaSettingsId,
    pub batch_id: BackupCodeBatchId,
    pub code_hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_from_ip: Option<String>,
    pub used_from_user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupCode {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_deleted && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailOtp {
    pub id: EmailOtpId,
    pub user_id: UserId,
    pub otp_hash: String,
    pub email_address: String,
    pub purpose: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_from_ip: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailOtp {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.blocked && !self.is_deleted && self.expires_at > now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count > self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaAction {
    TotpSetup,
    TotpVerified,
    TotpFailed,
    MfaEnabled,
    MfaDisabled,
    BackupCodeUsed,
    BackupCodeFailed,
    BackupCodesGenerated,
    EmailOtpSent,
    EmailOtpVerified,
    EmailOtpFailed,
    MfaRecoveryInitiated,
    MfaRecoveryCompleted,
    EnforcementChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaAuditEntry {
    pub id: AuditEntryId,
    pub user_id: UserId,
    pub mfa_settings_id: Option<MfaSettingsId>,
    pub action: MfaAction,
    pub method: Option<MfaMethod>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub risk_score: Option<f64>,
    pub triggered_alert: bool,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MfaAuditEntry {
    pub fn new(user_id: UserId, action: MfaAction, success: bool) -> Self {
        Self {
            id: AuditEntryId::new_random(),
            user_id,
            mfa_settings_id: None,
            action,
            method: None,
            success,
            failure_reason: None,
            ip_address: None,
            user_agent: None,
            risk_score: None,
            triggered_alert: false,
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_method(mut self, method: MfaMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_settings(mut self, settings_id: &MfaSettingsId) -> Self {
        self.mfa_settings_id = Some(settings_id.clone());
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Where a verification request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent,
        }
    }
}

/// Returned once from TOTP setup. The plaintext secret is never stored.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_formatted_secret: String,
}

/// Plaintext backup codes handed to the user exactly once.
#[derive(Debug, Clone)]
pub struct BackupCodeBatch {
    pub batch_id: BackupCodeBatchId,
    pub codes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}
