//! Lockout policy engine.
//!
//! Creates, expires and releases [`LockoutRecord`]s. Automatic lockouts grow with
//! repeated offenses inside a rolling 24 hour window:
//!
//! ```text
//! level    = min(lockouts started in the last 24h + 1, 5)
//! duration = min(initial * multiplier^(level - 1), max)
//! ```
//!
//! With progressive lockout disabled every automatic lockout is level 1 and lasts
//! `initial_lockout_minutes`. Manual lockouts take an explicit duration or last until
//! released.
//!
//! Expiry is evaluated lazily: [`LockoutPolicyEngine::get_active`] releases a lockout
//! whose end has passed with [`ReleaseReason::AutomaticTimeout`].

use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};

use super::SecuritySettingsService;
use crate::{
    Error, UserId,
    events::{EventBus, SecurityEvent},
    id::LockoutId,
    lockout::{
        LockRequest, LockoutReason, LockoutRecord, LockoutStatistics, LockoutType, Release,
        ReleaseReason,
    },
    repositories::{
        LockoutRepository, LockoutRepositoryProvider, Page, PageRequest,
        SettingsRepositoryProvider,
    },
    settings::SecuritySettings,
};

/// Highest progressive lockout level.
pub const MAX_LOCKOUT_LEVEL: u32 = 5;

/// Window in which earlier lockouts raise the level of a new one.
const ESCALATION_WINDOW_HOURS: i64 = 24;

/// Level for a new automatic lockout given the lockouts started in the escalation window.
pub fn lockout_level(prior_lockouts: u64, progressive: bool) -> u32 {
    if !progressive {
        return 1;
    }
    prior_lockouts
        .saturating_add(1)
        .min(u64::from(MAX_LOCKOUT_LEVEL)) as u32
}

/// Duration in minutes of an automatic lockout at `level`.
pub fn lockout_duration_minutes(settings: &SecuritySettings, level: u32) -> i64 {
    if !settings.progressive_lockout_enabled {
        return settings.initial_lockout_minutes;
    }

    let exponent = level.saturating_sub(1) as i32;
    let scaled = settings.initial_lockout_minutes as f64 * settings.lockout_multiplier.powi(exponent);
    if !scaled.is_finite() || scaled >= settings.max_lockout_minutes as f64 {
        return settings.max_lockout_minutes;
    }
    scaled as i64
}

pub struct LockoutPolicyEngine<R>
where
    R: LockoutRepositoryProvider + SettingsRepositoryProvider,
{
    repository: Arc<R>,
    settings: Arc<SecuritySettingsService<R>>,
    events: EventBus,
}

impl<R> LockoutPolicyEngine<R>
where
    R: LockoutRepositoryProvider + SettingsRepositoryProvider,
{
    pub fn new(
        repository: Arc<R>,
        settings: Arc<SecuritySettingsService<R>>,
        events: EventBus,
    ) -> Self {
        Self {
            repository,
            settings,
            events,
        }
    }

    /// Create a lockout, superseding any lockout already active for the user.
    pub async fn lock(&self, request: LockRequest) -> Result<LockoutRecord, Error> {
        let now = Utc::now();

        let (level, duration_minutes) = if request.manual {
            (1, request.duration_minutes)
        } else {
            let settings = self.settings.resolve(&request.user_id).await?;
            // Two racing locks for one user can both count each other here, so the
            // level may step by two. `activate` still leaves a single active record.
            let prior = if settings.progressive_lockout_enabled {
                self.repository
                    .lockout()
                    .count_started_since(
                        &request.user_id,
                        now - Duration::hours(ESCALATION_WINDOW_HOURS),
                    )
                    .await?
            } else {
                0
            };
            let level = lockout_level(prior, settings.progressive_lockout_enabled);
            let duration = request
                .duration_minutes
                .unwrap_or_else(|| lockout_duration_minutes(&settings, level));
            (level, Some(duration))
        };

        let record = LockoutRecord {
            id: LockoutId::new_random(),
            user_id: request.user_id.clone(),
            lockout_type: request.lockout_type,
            reason: request.reason,
            started_at: now,
            ends_at: duration_minutes.map(|minutes| now + Duration::minutes(minutes)),
            duration_minutes,
            failed_attempt_count: request.failed_attempt_count,
            level,
            triggering_ip: request.triggering_ip,
            is_manual: request.manual,
            locked_by: request.locked_by,
            details: request.details,
            is_active: true,
            released_at: None,
            release_reason: None,
            released_by: None,
        };

        let (record, superseded) = self
            .repository
            .lockout()
            .activate(record, Release::now(ReleaseReason::Superseded, None))
            .await?;

        for previous in &superseded {
            tracing::debug!(
                user_id = %previous.user_id,
                lockout_id = %previous.id,
                "Superseded active lockout"
            );
        }

        tracing::info!(
            user_id = %record.user_id,
            lockout_id = %record.id,
            reason = ?record.reason,
            level = record.level,
            duration_minutes = ?record.duration_minutes,
            manual = record.is_manual,
            "Account locked"
        );

        self.events
            .emit(&SecurityEvent::AccountLocked {
                user_id: record.user_id.clone(),
                lockout_id: record.id.clone(),
                reason: record.reason,
                level: record.level,
                locked_until: record.ends_at,
                triggering_ip: record.triggering_ip.clone(),
                timestamp: now,
            })
            .await;

        Ok(record)
    }

    /// Lock a user by hand. `None` duration means until released.
    pub async fn lock_manual(
        &self,
        user_id: &UserId,
        lockout_type: LockoutType,
        reason: LockoutReason,
        duration_minutes: Option<i64>,
        locked_by: Option<UserId>,
        details: Option<String>,
    ) -> Result<LockoutRecord, Error> {
        let mut request =
            LockRequest::manual(user_id.clone(), reason, locked_by).with_type(lockout_type);
        request.duration_minutes = duration_minutes;
        request.details = details;
        self.lock(request).await
    }

    /// Release a lockout. Returns `false` if it was not active.
    pub async fn release(
        &self,
        lockout_id: &LockoutId,
        reason: ReleaseReason,
        released_by: Option<UserId>,
    ) -> Result<bool, Error> {
        let released = self
            .repository
            .lockout()
            .release(lockout_id, Release::now(reason, released_by))
            .await?;

        match released {
            Some(record) => {
                self.announce_release(&record).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release every active lockout for the user. Returns how many were released.
    pub async fn release_for_user(
        &self,
        user_id: &UserId,
        reason: ReleaseReason,
        released_by: Option<UserId>,
    ) -> Result<u64, Error> {
        let active = self
            .repository
            .lockout()
            .find_active_for_user(user_id)
            .await?;

        let mut released = 0;
        for lockout in active {
            if self
                .release(&lockout.id, reason, released_by.clone())
                .await?
            {
                released += 1;
            }
        }
        Ok(released)
    }

    /// The lockout currently blocking the user, if any.
    pub async fn get_active(&self, user_id: &UserId) -> Result<Option<LockoutRecord>, Error> {
        let now = Utc::now();
        let flagged = self
            .repository
            .lockout()
            .find_active_for_user(user_id)
            .await?;

        let mut current = None;
        for lockout in flagged {
            if lockout.is_active_at(now) {
                if current.is_none() {
                    current = Some(lockout);
                }
            } else if lockout.has_expired_at(now) {
                let released = self
                    .repository
                    .lockout()
                    .release(
                        &lockout.id,
                        Release::now(ReleaseReason::AutomaticTimeout, None),
                    )
                    .await?;
                if let Some(record) = released {
                    self.announce_release(&record).await;
                }
            }
        }
        Ok(current)
    }

    pub async fn is_locked(&self, user_id: &UserId) -> Result<bool, Error> {
        Ok(self.get_active(user_id).await?.is_some())
    }

    pub async fn history(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<LockoutRecord>, Error> {
        self.repository
            .lockout()
            .find_history_for_user(user_id, page)
            .await
    }

    /// Aggregate lockouts started in the last `days`, for one user or everyone.
    pub async fn statistics(
        &self,
        user_id: Option<&UserId>,
        days: i64,
    ) -> Result<LockoutStatistics, Error> {
        let now = Utc::now();
        let lockouts = self
            .repository
            .lockout()
            .find_started_since(user_id, now - Duration::days(days))
            .await?;

        let durations: Vec<i64> = lockouts.iter().filter_map(|l| l.duration_minutes).collect();
        let average_duration_minutes = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        let mut by_reason = HashMap::new();
        for lockout in &lockouts {
            *by_reason.entry(lockout.reason).or_insert(0) += 1;
        }

        Ok(LockoutStatistics {
            total_lockouts: lockouts.len(),
            active_lockouts: lockouts.iter().filter(|l| l.is_active_at(now)).count(),
            manual_lockouts: lockouts.iter().filter(|l| l.is_manual).count(),
            automatic_lockouts: lockouts.iter().filter(|l| !l.is_manual).count(),
            average_duration_minutes,
            by_reason,
        })
    }

    /// Delete released lockouts older than four times the retention period.
    pub async fn cleanup_history(&self) -> Result<u64, Error> {
        let retention_days = self.settings.global().await?.retention_days;
        let before = Utc::now() - Duration::days(retention_days.saturating_mul(4));
        let deleted = self
            .repository
            .lockout()
            .delete_inactive_before(before)
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "Cleaned up old lockout records");
        }
        Ok(deleted)
    }

    async fn announce_release(&self, record: &LockoutRecord) {
        let reason = record
            .release_reason
            .unwrap_or(ReleaseReason::ManualRelease);

        tracing::info!(
            user_id = %record.user_id,
            lockout_id = %record.id,
            reason = ?reason,
            "Lockout released"
        );

        self.events
            .emit(&SecurityEvent::AccountUnlocked {
                user_id: record.user_id.clone(),
                lockout_id: record.id.clone(),
                reason,
                released_by: record.released_by.clone(),
                timestamp: record.released_at.unwrap_or_else(Utc::now),
            })
            .await;
    }
}
