//! Login attempt records
//!
//! One [`LoginAttempt`] is written for every authentication try, successful or not.
//! Attempts are never updated after they are written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    id::{LoginAttemptId, SessionId, UserId},
    lockout::LockoutRecord,
};

/// Why an authentication try failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidCredentials,
    UserNotFound,
    /// The account had an active lockout. Recorded for audit but never counted toward a new lockout.
    AccountLocked,
    AccountDisabled,
    EmailNotConfirmed,
    InvalidMfaCode,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: LoginAttemptId,
    pub user_id: Option<UserId>,
    /// The email or username the client submitted.
    pub identifier: String,
    pub succeeded: bool,
    pub failure_reason: Option<FailureReason>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub risk_score: f64,
    pub is_suspicious: bool,
    pub triggered_lockout: bool,
    pub session_id: Option<SessionId>,
    pub attempted_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn is_failure(&self) -> bool {
        !self.succeeded
    }

    /// Failed attempts that count toward an automatic lockout.
    pub fn counts_toward_lockout(&self) -> bool {
        !self.succeeded && self.failure_reason != Some(FailureReason::AccountLocked)
    }
}

/// Input to [`LoginAttemptRecorder::record_attempt`](crate::services::LoginAttemptRecorder::record_attempt).
#[derive(Debug, Clone, Default)]
pub struct NewLoginAttempt {
    pub user_id: Option<UserId>,
    pub identifier: String,
    pub succeeded: bool,
    pub failure_reason: Option<FailureReason>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub session_id: Option<SessionId>,
}

impl NewLoginAttempt {
    pub fn success(user_id: UserId, identifier: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            identifier: identifier.into(),
            succeeded: true,
            ip_address: ip.into(),
            ..Default::default()
        }
    }

    pub fn failure(
        user_id: Option<UserId>,
        identifier: impl Into<String>,
        ip: impl Into<String>,
        reason: FailureReason,
    ) -> Self {
        Self {
            user_id,
            identifier: identifier.into(),
            succeeded: false,
            failure_reason: Some(reason),
            ip_address: ip.into(),
            ..Default::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Result of recording an attempt.
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub attempt: LoginAttempt,
    pub should_lockout: bool,
    pub lockout: Option<LockoutRecord>,
}

/// Aggregated login history for a user over a period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginStatistics {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub suspicious_attempts: usize,
    pub distinct_ip_addresses: usize,
    pub last_successful_login: Option<DateTime<Utc>>,
    pub last_failed_login: Option<DateTime<Utc>>,
}
