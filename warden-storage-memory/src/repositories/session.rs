//! In-memory implementation of the session repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use warden_core::{
    Error, SessionId, UserId,
    error::StorageError,
    repositories::SessionRepository,
    session::{Session, TerminationReason},
};

#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where(&self, predicate: impl Fn(&Session) -> bool) -> Option<Session> {
        self.sessions
            .iter()
            .find(|session| predicate(session.value()))
            .map(|session| session.value().clone())
    }

    fn newest_first(&self, predicate: impl Fn(&Session) -> bool) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|session| predicate(session.value()))
            .map(|session| session.value().clone())
            .collect();
        sessions.sort_by_key(|session| std::cmp::Reverse(session.created_at));
        sessions
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, session: Session) -> Result<Session, Error> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, Error> {
        Ok(self.sessions.get(id).map(|session| session.clone()))
    }

    async fn find_by_token(&self, session_token: &str) -> Result<Option<Session>, Error> {
        Ok(self.find_where(|session| session.session_token == session_token))
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>, Error> {
        Ok(self.find_where(|session| session.refresh_token == refresh_token))
    }

    async fn update(&self, session: Session) -> Result<Session, Error> {
        let Some(mut stored) = self.sessions.get_mut(&session.id) else {
            return Err(StorageError::NotFound.into());
        };
        *stored = session.clone();
        Ok(session)
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        Ok(self.newest_first(|session| &session.user_id == user_id && session.is_live_at(now)))
    }

    async fn find_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        Ok(self.newest_first(|session| &session.user_id == user_id && session.created_at >= since))
    }

    async fn find_all_for_user(&self, user_id: &UserId) -> Result<Vec<Session>, Error> {
        Ok(self.newest_first(|session| &session.user_id == user_id))
    }

    async fn deactivate(
        &self,
        id: &SessionId,
        reason: TerminationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, Error> {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Ok(None);
        };
        if !session.is_active {
            return Ok(None);
        }

        session.is_active = false;
        session.terminated_at = Some(at);
        session.termination_reason = Some(reason);
        session.updated_at = at;
        Ok(Some(session.clone()))
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let initial = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at >= before);
        Ok(initial.saturating_sub(self.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use warden_core::session::DeviceType;

    use super::*;

    fn session(user_id: &UserId, token: &str, created_minutes_ago: i64) -> Session {
        let created_at = Utc::now() - Duration::minutes(created_minutes_ago);
        Session {
            id: SessionId::new_random(),
            user_id: user_id.clone(),
            session_token: token.to_string(),
            refresh_token: format!("refresh-{token}"),
            ip_address: "10.0.0.1".to_string(),
            user_agent: None,
            device_type: DeviceType::Desktop,
            operating_system: "Unknown".to_string(),
            browser: "Unknown".to_string(),
            location: "Unknown".to_string(),
            device_info: None,
            is_active: true,
            is_suspicious: false,
            expires_at: created_at + Duration::hours(24),
            last_accessed_at: None,
            terminated_at: None,
            termination_reason: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_tokens() {
        let repo = MemorySessionRepository::new();
        let user = UserId::new_random();
        let created = repo.create(session(&user, "abc", 0)).await.unwrap();

        let by_token = repo.find_by_token("abc").await.unwrap().unwrap();
        assert_eq!(by_token.id, created.id);
        let by_refresh = repo.find_by_refresh_token("refresh-abc").await.unwrap().unwrap();
        assert_eq!(by_refresh.id, created.id);
        assert!(repo.find_by_token("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_session_fails() {
        let repo = MemorySessionRepository::new();
        let result = repo.update(session(&UserId::new_random(), "x", 0)).await;
        assert!(matches!(result, Err(Error::Storage(StorageError::NotFound))));
    }

    #[tokio::test]
    async fn test_deactivate_once() {
        let repo = MemorySessionRepository::new();
        let user = UserId::new_random();
        let created = repo.create(session(&user, "abc", 0)).await.unwrap();

        let ended = repo
            .deactivate(&created.id, TerminationReason::Logout, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(!ended.is_active);
        assert_eq!(ended.termination_reason, Some(TerminationReason::Logout));

        assert!(
            repo.deactivate(&created.id, TerminationReason::Logout, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            repo.find_active_for_user(&user, Utc::now())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let repo = MemorySessionRepository::new();
        let user = UserId::new_random();
        repo.create(session(&user, "old", 60)).await.unwrap();
        repo.create(session(&user, "new", 5)).await.unwrap();
        repo.create(session(&UserId::new_random(), "other", 1))
            .await
            .unwrap();

        let all = repo.find_all_for_user(&user).await.unwrap();
        let tokens: Vec<&str> = all.iter().map(|s| s.session_token.as_str()).collect();
        assert_eq!(tokens, vec!["new", "old"]);

        let recent = repo
            .find_for_user_since(&user, Utc::now() - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let repo = MemorySessionRepository::new();
        let user = UserId::new_random();
        repo.create(session(&user, "stale", 60 * 48)).await.unwrap();
        repo.create(session(&user, "fresh", 0)).await.unwrap();

        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(repo.find_by_token("fresh").await.unwrap().is_some());
    }
}
