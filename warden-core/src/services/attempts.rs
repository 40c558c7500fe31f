//! Login attempt recording, risk scoring and the lockout trigger.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};

use super::{LockoutPolicyEngine, SecuritySettingsService};
use crate::{
    Error, UserId,
    attempt::{FailureReason, LoginAttempt, LoginStatistics, NewLoginAttempt, RecordedAttempt},
    events::{EventBus, SecurityEvent},
    id::LoginAttemptId,
    lockout::{LockRequest, LockoutReason, LockoutType},
    repositories::{
        LockoutRepositoryProvider, LoginAttemptRepository, LoginAttemptRepositoryProvider,
        SettingsRepositoryProvider,
    },
    risk::{self, RiskInputs, UserHistory},
    settings::SecuritySettings,
};

/// Failed attempts from one IP within an hour above which the IP is blocked.
pub const IP_BLOCK_THRESHOLD: u64 = 20;

/// How far back successful logins count as known history for scoring.
const HISTORY_DAYS: i64 = 30;

pub struct LoginAttemptRecorder<R>
where
    R: LoginAttemptRepositoryProvider + LockoutRepositoryProvider + SettingsRepositoryProvider,
{
    repository: Arc<R>,
    settings: Arc<SecuritySettingsService<R>>,
    lockouts: Arc<LockoutPolicyEngine<R>>,
    events: EventBus,
}

impl<R> LoginAttemptRecorder<R>
where
    R: LoginAttemptRepositoryProvider + LockoutRepositoryProvider + SettingsRepositoryProvider,
{
    pub fn new(
        repository: Arc<R>,
        settings: Arc<SecuritySettingsService<R>>,
        lockouts: Arc<LockoutPolicyEngine<R>>,
        events: EventBus,
    ) -> Self {
        Self {
            repository,
            settings,
            lockouts,
            events,
        }
    }

    /// Score, persist and act on one login attempt.
    ///
    /// A failure for a known user that brings the failures inside the configured window
    /// to `max_failed_attempts` creates a lockout. The current attempt is part of that
    /// count, attempts rejected because the account was already locked are not.
    ///
    /// Scoring problems never block the attempt: the score falls back to a neutral 0.5.
    /// A failure to create the lockout is returned after the attempt has been stored.
    pub async fn record_attempt(&self, new: NewLoginAttempt) -> Result<RecordedAttempt, Error> {
        let now = Utc::now();
        let settings = match &new.user_id {
            Some(user_id) => self.settings.resolve(user_id).await?,
            None => self.settings.global().await?,
        };

        let risk_score = risk::or_neutral(
            self.score_attempt(&new, &settings, now)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        error = %e,
                        identifier = %new.identifier,
                        "Risk scoring failed, using neutral score"
                    );
                }),
        );
        let is_suspicious = risk::is_suspicious(risk_score, settings.suspicious_activity_threshold);

        let counts_toward_lockout =
            !new.succeeded && new.failure_reason != Some(FailureReason::AccountLocked);

        let mut should_lockout = false;
        let mut lockout = None;
        let mut lock_error = None;

        if let (true, Some(user_id)) = (counts_toward_lockout, &new.user_id) {
            let failures = self
                .repository
                .login_attempt()
                .count_lockout_failures_since(user_id, now - settings.failed_attempt_window())
                .await?
                + 1;

            if failures >= u64::from(settings.max_failed_attempts) {
                should_lockout = true;
                let request = lock_request(user_id, &settings, is_suspicious)
                    .with_failed_attempts(u32::try_from(failures).unwrap_or(u32::MAX))
                    .with_triggering_ip(new.ip_address.clone());

                match self.lockouts.lock(request).await {
                    Ok(record) => lockout = Some(record),
                    Err(e) => lock_error = Some(e),
                }
            }
        }

        let attempt = LoginAttempt {
            id: LoginAttemptId::new_random(),
            user_id: new.user_id,
            identifier: new.identifier,
            succeeded: new.succeeded,
            failure_reason: new.failure_reason,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            device_fingerprint: new.device_fingerprint,
            risk_score,
            is_suspicious,
            triggered_lockout: lockout.is_some(),
            session_id: new.session_id,
            attempted_at: now,
        };
        let attempt = self.repository.login_attempt().create(attempt).await?;

        if let Some(e) = lock_error {
            tracing::error!(
                error = %e,
                identifier = %attempt.identifier,
                "Failed to create lockout after failed login"
            );
            return Err(e);
        }

        if attempt.succeeded {
            tracing::debug!(
                user_id = ?attempt.user_id,
                ip_address = %attempt.ip_address,
                risk_score,
                "Recorded successful login"
            );
        } else {
            if is_suspicious {
                tracing::warn!(
                    identifier = %attempt.identifier,
                    ip_address = %attempt.ip_address,
                    risk_score,
                    "Suspicious failed login"
                );
            }

            self.events
                .emit(&SecurityEvent::LoginFailed {
                    user_id: attempt.user_id.clone(),
                    identifier: attempt.identifier.clone(),
                    ip_address: attempt.ip_address.clone(),
                    reason: attempt.failure_reason.unwrap_or(FailureReason::Other),
                    risk_score,
                    timestamp: now,
                })
                .await;
        }

        Ok(RecordedAttempt {
            attempt,
            should_lockout,
            lockout,
        })
    }

    async fn score_attempt(
        &self,
        new: &NewLoginAttempt,
        settings: &SecuritySettings,
        now: DateTime<Utc>,
    ) -> Result<f64, Error> {
        let attempts = self.repository.login_attempt();
        let ip_attempts = attempts
            .count_for_ip_since(&new.ip_address, now - Duration::hours(1))
            .await?;

        let (successes, recent_failures) = match &new.user_id {
            Some(user_id) => {
                let successes: Vec<LoginAttempt> = attempts
                    .find_for_user_since(user_id, now - Duration::days(HISTORY_DAYS))
                    .await?
                    .into_iter()
                    .filter(|a| a.succeeded)
                    .collect();
                let failures = attempts
                    .count_lockout_failures_since(user_id, now - settings.failed_attempt_window())
                    .await?;
                (successes, failures as usize)
            }
            None => (Vec::new(), 0),
        };

        let history = if new.user_id.is_some() {
            UserHistory::Known {
                successful_attempts: &successes,
                recent_failures,
            }
        } else {
            UserHistory::Unknown
        };

        Ok(risk::score(&RiskInputs {
            ip_address: &new.ip_address,
            user_agent: new.user_agent.as_deref(),
            history,
            ip_attempts_last_hour: ip_attempts as usize,
        }))
    }

    /// True when the IP produced more than [`IP_BLOCK_THRESHOLD`] failures in the last hour.
    pub async fn should_block_ip(&self, ip_address: &str) -> Result<bool, Error> {
        let failures = self
            .repository
            .login_attempt()
            .count_failed_for_ip_since(ip_address, Utc::now() - Duration::hours(1))
            .await?;
        Ok(failures > IP_BLOCK_THRESHOLD)
    }

    pub async fn login_statistics(
        &self,
        user_id: &UserId,
        days: i64,
    ) -> Result<LoginStatistics, Error> {
        let attempts = self
            .repository
            .login_attempt()
            .find_for_user_since(user_id, Utc::now() - Duration::days(days))
            .await?;
        Ok(summarize(&attempts))
    }

    /// Newest first.
    pub async fn recent_attempts(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, Error> {
        self.repository
            .login_attempt()
            .find_recent_for_user(user_id, limit)
            .await
    }

    pub async fn cleanup_old_attempts(&self, retention_days: i64) -> Result<u64, Error> {
        let deleted = self
            .repository
            .login_attempt()
            .delete_older_than(Utc::now() - Duration::days(retention_days))
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, retention_days, "Cleaned up old login attempts");
        }
        Ok(deleted)
    }
}

fn lock_request(user_id: &UserId, settings: &SecuritySettings, suspicious: bool) -> LockRequest {
    let lockout_type = if settings.progressive_lockout_enabled {
        LockoutType::Progressive
    } else {
        LockoutType::Automatic
    };
    let reason = if suspicious {
        LockoutReason::SuspiciousLoginPattern
    } else {
        LockoutReason::FailedLoginAttempts
    };
    LockRequest::automatic(user_id.clone(), lockout_type, reason)
}

fn summarize(attempts: &[LoginAttempt]) -> LoginStatistics {
    let distinct_ips: HashSet<&str> = attempts.iter().map(|a| a.ip_address.as_str()).collect();

    LoginStatistics {
        total_attempts: attempts.len(),
        successful_attempts: attempts.iter().filter(|a| a.succeeded).count(),
        failed_attempts: attempts.iter().filter(|a| !a.succeeded).count(),
        suspicious_attempts: attempts.iter().filter(|a| a.is_suspicious).count(),
        distinct_ip_addresses: distinct_ips.len(),
        last_successful_login: attempts
            .iter()
            .filter(|a| a.succeeded)
            .map(|a| a.attempted_at)
            .max(),
        last_failed_login: attempts
            .iter()
            .filter(|a| !a.succeeded)
            .map(|a| a.attempted_at)
            .max(),
    }
}
