//! Session lifecycle: creation with concurrency limits and suspicious-login detection,
//! sliding expiry, termination and reporting.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};

use super::SecuritySettingsService;
use crate::{
    Error, UserId,
    error::utilities::BestEffortExt,
    events::{EventBus, SecurityEvent},
    id::SessionId,
    mailer::EmailSender,
    repositories::{
        SessionRepository, SessionRepositoryProvider, SettingsRepositoryProvider, UserRepository,
        UserRepositoryProvider,
    },
    session::{
        CreatedSession, DeviceInfo, NewSession, Session, SessionStatistics, SessionSummary,
        TerminationReason, UNKNOWN_LOCATION, browser_family, location_country,
    },
};

/// How far back earlier sessions count as known when judging a new one.
const HISTORY_DAYS: i64 = 30;

/// Sessions considered when counting suspicious ones for statistics.
const SUSPICIOUS_SAMPLE: usize = 50;

/// Distinct locations and devices listed in statistics.
const RECENT_LIMIT: usize = 10;

pub const SUSPICIOUS_LOGIN_SUBJECT: &str = "Security Alert: Suspicious Login";

/// A login is suspicious when it comes from an IP, a browser family or a country that
/// none of `history` used. A user without history is never flagged.
pub fn is_suspicious_login(
    history: &[Session],
    ip_address: &str,
    user_agent: Option<&str>,
    location: &str,
) -> bool {
    if history.is_empty() {
        return false;
    }

    let new_ip = !history.iter().any(|s| s.ip_address == ip_address);

    let new_browser = user_agent.is_some_and(|ua| {
        let family = browser_family(ua);
        !history
            .iter()
            .filter_map(|s| s.user_agent.as_deref())
            .any(|seen| browser_family(seen) == family)
    });

    let new_country = location_country(location).is_some_and(|country| {
        !history
            .iter()
            .filter_map(Session::country)
            .any(|seen| seen.eq_ignore_ascii_case(country))
    });

    new_ip || new_browser || new_country
}

/// Sessions to evict so that, with one new session, at most `max_sessions` stay active.
/// Least recently used go first.
pub fn select_evictions(mut others: Vec<Session>, max_sessions: usize) -> Vec<Session> {
    let keep = max_sessions.saturating_sub(1);
    if others.len() <= keep {
        return Vec::new();
    }
    others.sort_by_key(Session::last_seen);
    let excess = others.len() - keep;
    others.truncate(excess);
    others
}

pub fn device_label(session: &Session) -> String {
    DeviceInfo {
        device_type: session.device_type,
        operating_system: session.operating_system.clone(),
        browser: session.browser.clone(),
    }
    .label()
}

pub struct SessionManager<R>
where
    R: SessionRepositoryProvider + SettingsRepositoryProvider + UserRepositoryProvider,
{
    repository: Arc<R>,
    settings: Arc<SecuritySettingsService<R>>,
    mailer: Arc<dyn EmailSender>,
    events: EventBus,
}

impl<R> SessionManager<R>
where
    R: SessionRepositoryProvider + SettingsRepositoryProvider + UserRepositoryProvider,
{
    pub fn new(
        repository: Arc<R>,
        settings: Arc<SecuritySettingsService<R>>,
        mailer: Arc<dyn EmailSender>,
        events: EventBus,
    ) -> Self {
        Self {
            repository,
            settings,
            mailer,
            events,
        }
    }

    /// Open a session, evicting the least recently used ones beyond the user's cap.
    pub async fn create_session(&self, new: NewSession) -> Result<CreatedSession, Error> {
        let settings = self.settings.resolve(&new.user_id).await?;
        let now = Utc::now();

        let history = self
            .repository
            .session()
            .find_for_user_since(&new.user_id, now - Duration::days(HISTORY_DAYS))
            .await?;

        let location = new
            .location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        let suspicious = is_suspicious_login(
            &history,
            &new.ip_address,
            new.user_agent.as_deref(),
            &location,
        );
        let device = DeviceInfo::parse(new.user_agent.as_deref());

        let session = Session {
            id: SessionId::new_random(),
            user_id: new.user_id,
            session_token: new.session_token,
            refresh_token: new.refresh_token,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            device_info: Some(new.device_info.unwrap_or_else(|| device.label())),
            device_type: device.device_type,
            operating_system: device.operating_system,
            browser: device.browser,
            location,
            is_active: true,
            is_suspicious: suspicious,
            expires_at: now + settings.session_timeout(),
            last_accessed_at: None,
            terminated_at: None,
            termination_reason: None,
            created_at: now,
            updated_at: now,
        };
        let session = self.repository.session().create(session).await?;

        let others: Vec<Session> = self
            .repository
            .session()
            .find_active_for_user(&session.user_id, now)
            .await?
            .into_iter()
            .filter(|s| s.id != session.id)
            .collect();

        let mut terminated_sessions = Vec::new();
        for victim in select_evictions(others, settings.max_concurrent_sessions as usize) {
            if let Some(evicted) = self
                .repository
                .session()
                .deactivate(&victim.id, TerminationReason::ConcurrentLimit, now)
                .await?
            {
                self.announce_termination(&evicted, TerminationReason::ConcurrentLimit)
                    .await;
                terminated_sessions.push(evicted);
            }
        }
        if !terminated_sessions.is_empty() {
            tracing::info!(
                user_id = %session.user_id,
                evicted = terminated_sessions.len(),
                max_sessions = settings.max_concurrent_sessions,
                "Evicted sessions over the concurrent limit"
            );
        }

        self.events
            .emit(&SecurityEvent::SessionCreated {
                user_id: session.user_id.clone(),
                session_id: session.id.clone(),
                suspicious,
                timestamp: now,
            })
            .await;

        if suspicious {
            tracing::warn!(
                user_id = %session.user_id,
                session_id = %session.id,
                ip_address = %session.ip_address,
                location = %session.location,
                "Suspicious login"
            );
            self.events
                .emit(&SecurityEvent::SuspiciousLogin {
                    user_id: session.user_id.clone(),
                    session_id: session.id.clone(),
                    ip_address: session.ip_address.clone(),
                    location: session.location.clone(),
                    timestamp: now,
                })
                .await;
            if settings.alerting_enabled {
                self.send_security_alert(&session).await;
            }
        }

        Ok(CreatedSession {
            session,
            terminated_sessions,
            suspicious,
        })
    }

    /// Record activity and slide the expiry forward. `None` if the session is not live.
    pub async fn update_activity(&self, session_token: &str) -> Result<Option<Session>, Error> {
        let now = Utc::now();
        let Some(mut session) = self.live_by_token(session_token, now).await? else {
            return Ok(None);
        };

        let settings = self.settings.resolve(&session.user_id).await?;
        session.last_accessed_at = Some(now);
        session.expires_at = now + settings.session_timeout();
        session.updated_at = now;
        Ok(Some(self.repository.session().update(session).await?))
    }

    /// The live session for a token, without touching it.
    pub async fn validate(&self, session_token: &str) -> Result<Option<Session>, Error> {
        self.live_by_token(session_token, Utc::now()).await
    }

    /// End one of the user's sessions. Returns `false` if it is not theirs or already ended.
    pub async fn terminate(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        reason: TerminationReason,
    ) -> Result<bool, Error> {
        let owned = self
            .repository
            .session()
            .find_by_id(session_id)
            .await?
            .is_some_and(|s| &s.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        self.deactivate(session_id, reason).await
    }

    pub async fn terminate_by_token(
        &self,
        session_token: &str,
        reason: TerminationReason,
    ) -> Result<bool, Error> {
        match self.repository.session().find_by_token(session_token).await? {
            Some(session) => self.deactivate(&session.id, reason).await,
            None => Ok(false),
        }
    }

    /// End every active session of the user except `keep`.
    pub async fn terminate_all_others(
        &self,
        user_id: &UserId,
        keep: &SessionId,
        reason: TerminationReason,
    ) -> Result<u64, Error> {
        self.terminate_matching(user_id, reason, |s| &s.id != keep)
            .await
    }

    pub async fn terminate_all(
        &self,
        user_id: &UserId,
        reason: TerminationReason,
    ) -> Result<u64, Error> {
        self.terminate_matching(user_id, reason, |_| true).await
    }

    /// The live session holding `refresh_token`.
    pub async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, Error> {
        let now = Utc::now();
        Ok(self
            .repository
            .session()
            .find_by_refresh_token(refresh_token)
            .await?
            .filter(|s| s.is_live_at(now)))
    }

    /// Swap both tokens of a live session, sliding its expiry.
    pub async fn rotate_tokens(
        &self,
        session_id: &SessionId,
        session_token: String,
        refresh_token: String,
    ) -> Result<Option<Session>, Error> {
        let now = Utc::now();
        let Some(mut session) = self
            .repository
            .session()
            .find_by_id(session_id)
            .await?
            .filter(|s| s.is_live_at(now))
        else {
            return Ok(None);
        };

        let settings = self.settings.resolve(&session.user_id).await?;
        session.session_token = session_token;
        session.refresh_token = refresh_token;
        session.last_accessed_at = Some(now);
        session.expires_at = now + settings.session_timeout();
        session.updated_at = now;
        Ok(Some(self.repository.session().update(session).await?))
    }

    /// Live sessions, most recently used first. `current_token` marks the caller's own.
    pub async fn list_active(
        &self,
        user_id: &UserId,
        current_token: Option<&str>,
    ) -> Result<Vec<SessionSummary>, Error> {
        let now = Utc::now();
        let mut sessions = self
            .repository
            .session()
            .find_active_for_user(user_id, now)
            .await?;
        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_seen()));

        Ok(sessions
            .iter()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                device: device_label(s),
                ip_address: s.ip_address.clone(),
                location: s.location.clone(),
                created_at: s.created_at,
                last_accessed_at: s.last_accessed_at,
                expires_at: s.expires_at,
                is_current: current_token.is_some_and(|t| t == s.session_token),
                is_suspicious: s.is_suspicious,
                activity_score: s.activity_score_at(now),
            })
            .collect())
    }

    pub async fn statistics(&self, user_id: &UserId) -> Result<SessionStatistics, Error> {
        let sessions = self.repository.session().find_all_for_user(user_id).await?;
        Ok(summarize(&sessions, Utc::now()))
    }

    pub async fn concurrent_count(&self, user_id: &UserId) -> Result<usize, Error> {
        Ok(self
            .repository
            .session()
            .find_active_for_user(user_id, Utc::now())
            .await?
            .len())
    }

    /// Delete sessions that expired longer ago than the global retention period.
    pub async fn cleanup_expired(&self) -> Result<u64, Error> {
        let retention_days = self.settings.global().await?.retention_days;
        let deleted = self
            .repository
            .session()
            .delete_expired(Utc::now() - Duration::days(retention_days))
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "Cleaned up expired sessions");
        }
        Ok(deleted)
    }

    pub fn parse_device_info(&self, user_agent: Option<&str>) -> DeviceInfo {
        DeviceInfo::parse(user_agent)
    }

    async fn live_by_token(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, Error> {
        Ok(self
            .repository
            .session()
            .find_by_token(session_token)
            .await?
            .filter(|s| s.is_live_at(now)))
    }

    async fn deactivate(
        &self,
        session_id: &SessionId,
        reason: TerminationReason,
    ) -> Result<bool, Error> {
        match self
            .repository
            .session()
            .deactivate(session_id, reason, Utc::now())
            .await?
        {
            Some(session) => {
                self.announce_termination(&session, reason).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn terminate_matching(
        &self,
        user_id: &UserId,
        reason: TerminationReason,
        selector: impl Fn(&Session) -> bool,
    ) -> Result<u64, Error> {
        let sessions = self.repository.session().find_all_for_user(user_id).await?;

        let mut terminated = 0;
        for session in sessions.iter().filter(|s| s.is_active && selector(s)) {
            if self.deactivate(&session.id, reason).await? {
                terminated += 1;
            }
        }
        if terminated > 0 {
            tracing::info!(user_id = %user_id, count = terminated, reason = ?reason, "Terminated sessions");
        }
        Ok(terminated)
    }

    async fn announce_termination(&self, session: &Session, reason: TerminationReason) {
        tracing::debug!(
            user_id = %session.user_id,
            session_id = %session.id,
            reason = ?reason,
            "Session terminated"
        );
        self.events
            .emit(&SecurityEvent::SessionTerminated {
                user_id: session.user_id.clone(),
                session_id: session.id.clone(),
                reason,
                timestamp: session.terminated_at.unwrap_or_else(Utc::now),
            })
            .await;
    }

    async fn send_security_alert(&self, session: &Session) {
        let Some(user) = self
            .repository
            .user()
            .find_by_id(&session.user_id)
            .await
            .best_effort("load user for security alert")
            .flatten()
        else {
            return;
        };
        let Some(email) = user.email.as_deref() else {
            return;
        };

        let body = format!(
            "<p>Hello {name},</p>\
             <p>We noticed a sign-in to your account from a new device or location.</p>\
             <ul>\
             <li>Time: {time}</li>\
             <li>IP address: {ip}</li>\
             <li>Location: {location}</li>\
             <li>Device: {device}</li>\
             </ul>\
             <p>If this was not you, sign out of all sessions and change your password.</p>",
            name = user.display_name(),
            time = session.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            ip = session.ip_address,
            location = session.location,
            device = device_label(session),
        );

        self.mailer
            .send_email(email, SUSPICIOUS_LOGIN_SUBJECT, &body, true)
            .await
            .best_effort("send suspicious login alert");
    }
}

fn summarize(sessions: &[Session], now: DateTime<Utc>) -> SessionStatistics {
    let mut by_location: HashMap<String, usize> = HashMap::new();
    let mut by_device: HashMap<String, usize> = HashMap::new();
    let mut recent_locations = Vec::new();
    let mut recent_devices = Vec::new();
    let mut seen_locations = HashSet::new();
    let mut seen_devices = HashSet::new();

    let mut newest_first: Vec<&Session> = sessions.iter().collect();
    newest_first.sort_by_key(|s| std::cmp::Reverse(s.created_at));

    for session in &newest_first {
        let device = device_label(session);
        *by_location.entry(session.location.clone()).or_default() += 1;
        *by_device.entry(device.clone()).or_default() += 1;

        if recent_locations.len() < RECENT_LIMIT && seen_locations.insert(session.location.clone())
        {
            recent_locations.push(session.location.clone());
        }
        if recent_devices.len() < RECENT_LIMIT && seen_devices.insert(device.clone()) {
            recent_devices.push(device);
        }
    }

    let last = newest_first.first();
    SessionStatistics {
        total_sessions: sessions.len(),
        active_sessions: sessions.iter().filter(|s| s.is_live_at(now)).count(),
        expired_sessions: sessions.iter().filter(|s| s.is_expired_at(now)).count(),
        suspicious_sessions: newest_first
            .iter()
            .take(SUSPICIOUS_SAMPLE)
            .filter(|s| s.is_suspicious)
            .count(),
        last_login_at: last.map(|s| s.created_at),
        last_login_location: last.map(|s| s.location.clone()),
        last_login_device: last.map(|s| device_label(s)),
        recent_locations,
        recent_devices,
        sessions_by_location: by_location,
        sessions_by_device: by_device,
    }
}
