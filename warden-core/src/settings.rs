//! Security policy settings
//!
//! A single global default record always exists (created lazily on first use) and
//! per-user records override it wholesale.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    id::{SettingsId, UserId},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum SettingsScope {
    GlobalDefault,
    PerUser(UserId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub id: SettingsId,
    pub scope: SettingsScope,
    pub max_failed_attempts: u32,
    pub initial_lockout_minutes: i64,
    pub max_lockout_minutes: i64,
    pub lockout_multiplier: f64,
    pub failed_attempt_window_minutes: i64,
    pub progressive_lockout_enabled: bool,
    pub suspicious_activity_threshold: f64,
    pub max_concurrent_sessions: u32,
    pub session_timeout_minutes: i64,
    pub retention_days: i64,
    pub alerting_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: SettingsId::new_random(),
            scope: SettingsScope::GlobalDefault,
            max_failed_attempts: 5,
            initial_lockout_minutes: 15,
            max_lockout_minutes: 1440,
            lockout_multiplier: 2.0,
            failed_attempt_window_minutes: 60,
            progressive_lockout_enabled: true,
            suspicious_activity_threshold: 0.7,
            max_concurrent_sessions: 5,
            session_timeout_minutes: 60,
            retention_days: 90,
            alerting_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl SecuritySettings {
    /// Copy these settings into a per-user record for `user_id`.
    pub fn for_user(&self, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: SettingsId::new_random(),
            scope: SettingsScope::PerUser(user_id),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope == SettingsScope::GlobalDefault
    }

    pub fn failed_attempt_window(&self) -> Duration {
        Duration::minutes(self.failed_attempt_window_minutes)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::minutes(self.session_timeout_minutes)
    }

    pub fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    pub fn with_lockout_minutes(mut self, initial: i64, max: i64) -> Self {
        self.initial_lockout_minutes = initial;
        self.max_lockout_minutes = max;
        self
    }

    pub fn with_lockout_multiplier(mut self, multiplier: f64) -> Self {
        self.lockout_multiplier = multiplier;
        self
    }

    pub fn with_progressive_lockout(mut self, enabled: bool) -> Self {
        self.progressive_lockout_enabled = enabled;
        self
    }

    pub fn with_suspicious_activity_threshold(mut self, threshold: f64) -> Self {
        self.suspicious_activity_threshold = threshold;
        self
    }

    pub fn with_max_concurrent_sessions(mut self, sessions: u32) -> Self {
        self.max_concurrent_sessions = sessions;
        self
    }

    pub fn with_session_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout_minutes = minutes;
        self
    }

    pub fn with_alerting(mut self, enabled: bool) -> Self {
        self.alerting_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_failed_attempts < 1 {
            return Err(ValidationError::InvalidField(
                "max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_lockout_minutes < 1 {
            return Err(ValidationError::InvalidField(
                "initial_lockout_minutes must be at least 1".to_string(),
            ));
        }
        if self.max_lockout_minutes < self.initial_lockout_minutes {
            return Err(ValidationError::InvalidField(
                "max_lockout_minutes must not be below initial_lockout_minutes".to_string(),
            ));
        }
        if self.lockout_multiplier.is_nan() || self.lockout_multiplier < 1.0 {
            return Err(ValidationError::InvalidField(
                "lockout_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.failed_attempt_window_minutes < 1 {
            return Err(ValidationError::InvalidField(
                "failed_attempt_window_minutes must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.suspicious_activity_threshold) {
            return Err(ValidationError::OutOfRange {
                field: "suspicious_activity_threshold",
                min: "0.0".to_string(),
                max: "1.0".to_string(),
            });
        }
        if self.max_concurrent_sessions < 1 {
            return Err(ValidationError::InvalidField(
                "max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if self.session_timeout_minutes < 1 {
            return Err(ValidationError::InvalidField(
                "session_timeout_minutes must be at least 1".to_string(),
            ));
        }
        if self.retention_days < 1 {
            return Err(ValidationError::InvalidField(
                "retention_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SecuritySettings::default();
        assert!(settings.is_global());
        assert_eq!(settings.max_failed_attempts, 5);
        assert_eq!(settings.initial_lockout_minutes, 15);
        assert_eq!(settings.max_lockout_minutes, 1440);
        assert_eq!(settings.lockout_multiplier, 2.0);
        assert_eq!(settings.failed_attempt_window_minutes, 60);
        assert!(settings.progressive_lockout_enabled);
        assert_eq!(settings.suspicious_activity_threshold, 0.7);
        assert_eq!(settings.max_concurrent_sessions, 5);
        assert_eq!(settings.session_timeout_minutes, 60);
        assert_eq!(settings.retention_days, 90);
        assert!(settings.alerting_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_for_user_copies_policy() {
        let global = SecuritySettings::default().with_max_concurrent_sessions(3);
        let user_id = UserId::new_random();
        let per_user = global.for_user(user_id.clone());

        assert_eq!(per_user.scope, SettingsScope::PerUser(user_id));
        assert_eq!(per_user.max_concurrent_sessions, 3);
        assert_ne!(per_user.id, global.id);
    }

    #[test]
    fn test_validation() {
        assert!(
            SecuritySettings::default()
                .with_lockout_multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            SecuritySettings::default()
                .with_lockout_multiplier(f64::NAN)
                .validate()
                .is_err()
        );
        assert!(
            SecuritySettings::default()
                .with_suspicious_activity_threshold(1.5)
                .validate()
                .is_err()
        );
        assert!(
            SecuritySettings::default()
                .with_lockout_minutes(30, 10)
                .validate()
                .is_err()
        );
        assert!(
            SecuritySettings::default()
                .with_max_failed_attempts(0)
                .validate()
                .is_err()
        );
    }
}
