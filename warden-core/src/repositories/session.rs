//! Repository trait for sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error, UserId,
    id::SessionId,
    session::{Session, TerminationReason},
};

#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    async fn create(&self, session: Session) -> Result<Session, Error>;

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, Error>;

    async fn find_by_token(&self, session_token: &str) -> Result<Option<Session>, Error>;

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>, Error>;

    /// Replace a stored session.
    async fn update(&self, session: Session) -> Result<Session, Error>;

    /// Sessions with the active flag set and `expires_at` after `now`.
    async fn find_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error>;

    /// All sessions for the user created at or after `since`, newest first.
    async fn find_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error>;

    /// Every session the user has, newest first.
    async fn find_all_for_user(&self, user_id: &UserId) -> Result<Vec<Session>, Error>;

    /// Deactivate the session if it is still active. Returns the updated session.
    async fn deactivate(
        &self,
        id: &SessionId,
        reason: TerminationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, Error>;

    /// Delete sessions that expired before `before`. Returns how many were removed.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
