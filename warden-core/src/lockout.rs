//! Lockout records
//!
//! A [`LockoutRecord`] blocks authentication for a user until it ends or is released.
//! A user has at most one active record at a time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{LockoutId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutType {
    Automatic,
    Manual,
    SuspiciousActivity,
    PolicyViolation,
    CompromisedAccount,
    Maintenance,
    Progressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutReason {
    FailedLoginAttempts,
    SuspiciousLoginPattern,
    FailedMfaAttempts,
    SuspiciousLocation,
    UnusualDevice,
    RateLimitExceeded,
    ManualLockout,
    CompromisedAccount,
    PolicyViolation,
    BruteForceAttack,
    SecurityMeasure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    AutomaticTimeout,
    ManualRelease,
    EmailVerification,
    MfaVerification,
    PasswordReset,
    SystemPolicy,
    SecurityReview,
    /// Replaced by a newer lockout for the same user.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub id: LockoutId,
    pub user_id: UserId,
    pub lockout_type: LockoutType,
    pub reason: LockoutReason,
    pub started_at: DateTime<Utc>,
    /// `None` means the lockout lasts until released.
    pub ends_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub failed_attempt_count: u32,
    pub level: u32,
    pub triggering_ip: Option<String>,
    pub is_manual: bool,
    pub locked_by: Option<UserId>,
    pub details: Option<String>,
    pub is_active: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
    pub released_by: Option<UserId>,
}

impl LockoutRecord {
    /// Active means not released and not past its end.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.ends_at.is_none_or(|end| end > now)
    }

    /// Released or not, whether the end time has passed.
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| end <= now)
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.ends_at.map(|end| (end - now).num_minutes().max(0))
    }
}

/// Stamp applied when a lockout is released.
#[derive(Debug, Clone)]
pub struct Release {
    pub reason: ReleaseReason,
    pub released_by: Option<UserId>,
    pub released_at: DateTime<Utc>,
}

impl Release {
    pub fn now(reason: ReleaseReason, released_by: Option<UserId>) -> Self {
        Self {
            reason,
            released_by,
            released_at: Utc::now(),
        }
    }
}

/// Parameters for [`LockoutPolicyEngine::lock`](crate::services::LockoutPolicyEngine::lock).
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub user_id: UserId,
    pub lockout_type: LockoutType,
    pub reason: LockoutReason,
    pub failed_attempt_count: u32,
    pub triggering_ip: Option<String>,
    pub manual: bool,
    pub locked_by: Option<UserId>,
    pub details: Option<String>,
    /// Explicit duration for manual lockouts. `None` on a manual lock means indefinite.
    pub duration_minutes: Option<i64>,
}

impl LockRequest {
    pub fn automatic(user_id: UserId, lockout_type: LockoutType, reason: LockoutReason) -> Self {
        Self {
            user_id,
            lockout_type,
            reason,
            failed_attempt_count: 0,
            triggering_ip: None,
            manual: false,
            locked_by: None,
            details: None,
            duration_minutes: None,
        }
    }

    pub fn manual(user_id: UserId, reason: LockoutReason, locked_by: Option<UserId>) -> Self {
        Self {
            manual: true,
            locked_by,
            ..Self::automatic(user_id, LockoutType::Manual, reason)
        }
    }

    pub fn with_failed_attempts(mut self, count: u32) -> Self {
        self.failed_attempt_count = count;
        self
    }

    pub fn with_triggering_ip(mut self, ip: impl Into<String>) -> Self {
        self.triggering_ip = Some(ip.into());
        self
    }

    pub fn with_duration_minutes(mut self, minutes: i64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_type(mut self, lockout_type: LockoutType) -> Self {
        self.lockout_type = lockout_type;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockoutStatistics {
    pub total_lockouts: usize,
    pub active_lockouts: usize,
    pub manual_lockouts: usize,
    pub automatic_lockouts: usize,
    pub average_duration_minutes: f64,
    pub by_reason: HashMap<LockoutReason, usize>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(ends_at: Option<DateTime<Utc>>, is_active: bool) -> LockoutRecord {
        LockoutRecord {
            id: LockoutId::new_random(),
            user_id: UserId::new_random(),
            lockout_type: LockoutType::Automatic,
            reason: LockoutReason::FailedLoginAttempts,
            started_at: Utc::now(),
            ends_at,
            duration_minutes: None,
            failed_attempt_count: 5,
            level: 1,
            triggering_ip: None,
            is_manual: false,
            locked_by: None,
            details: None,
            is_active,
            released_at: None,
            release_reason: None,
            released_by: None,
        }
    }

    #[test]
    fn test_active_requires_flag_and_future_end() {
        let now = Utc::now();
        assert!(record(Some(now + Duration::minutes(5)), true).is_active_at(now));
        assert!(record(None, true).is_active_at(now));
        assert!(!record(Some(now - Duration::seconds(1)), true).is_active_at(now));
        assert!(!record(Some(now + Duration::minutes(5)), false).is_active_at(now));
    }

    #[test]
    fn test_end_exactly_now_is_expired() {
        let now = Utc::now();
        let lockout = record(Some(now), true);
        assert!(!lockout.is_active_at(now));
        assert!(lockout.has_expired_at(now));
    }

    #[test]
    fn test_remaining_minutes() {
        let now = Utc::now();
        assert_eq!(
            record(Some(now + Duration::minutes(30)), true).remaining_minutes(now),
            Some(30)
        );
        assert_eq!(record(None, true).remaining_minutes(now), None);
        assert_eq!(
            record(Some(now - Duration::minutes(3)), true).remaining_minutes(now),
            Some(0)
        );
    }

    #[test]
    fn test_manual_lock_request() {
        let request = LockRequest::manual(UserId::new_random(), LockoutReason::ManualLockout, None)
            .with_duration_minutes(90);
        assert!(request.manual);
        assert_eq!(request.lockout_type, LockoutType::Manual);
        assert_eq!(request.duration_minutes, Some(90));
    }
}
