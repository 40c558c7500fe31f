//! Repository trait for the login attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, UserId, attempt::LoginAttempt};

/// Append-only log of authentication attempts.
///
/// Attempts are recorded for unknown identifiers too, with no `user_id`, so IP based
/// queries see the whole picture.
#[async_trait]
pub trait LoginAttemptRepository: Send + Sync + 'static {
    async fn create(&self, attempt: LoginAttempt) -> Result<LoginAttempt, Error>;

    /// All attempts for the user at or after `since`, oldest first.
    async fn find_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, Error>;

    /// Failed attempts for the user at or after `since` that count toward a lockout.
    ///
    /// Attempts rejected because the account was already locked are excluded.
    async fn count_lockout_failures_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Attempts of any outcome from `ip_address` at or after `since`.
    async fn count_for_ip_since(&self, ip_address: &str, since: DateTime<Utc>)
    -> Result<u64, Error>;

    /// Failed attempts from `ip_address` at or after `since`.
    async fn count_failed_for_ip_since(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// The user's most recent attempts, newest first.
    async fn find_recent_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, Error>;

    /// Delete attempts older than `before` and return how many were removed.
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
