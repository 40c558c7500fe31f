//! In-memory implementation of the login attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use warden_core::{
    Error, UserId, attempt::LoginAttempt, id::LoginAttemptId,
    repositories::LoginAttemptRepository,
};

#[derive(Default)]
pub struct MemoryLoginAttemptRepository {
    attempts: DashMap<LoginAttemptId, LoginAttempt>,
}

impl MemoryLoginAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<LoginAttempt>
    where
        F: Fn(&LoginAttempt) -> bool,
    {
        self.attempts
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn count<F>(&self, predicate: F) -> u64
    where
        F: Fn(&LoginAttempt) -> bool,
    {
        self.attempts
            .iter()
            .filter(|entry| predicate(entry.value()))
            .count() as u64
    }
}

#[async_trait]
impl LoginAttemptRepository for MemoryLoginAttemptRepository {
    async fn create(&self, attempt: LoginAttempt) -> Result<LoginAttempt, Error> {
        self.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(attempt)
    }

    async fn find_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, Error> {
        let mut attempts = self.collect(|a| {
            a.user_id.as_ref() == Some(user_id) && a.attempted_at >= since
        });
        attempts.sort_by_key(|a| a.attempted_at);
        Ok(attempts)
    }

    async fn count_lockout_failures_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self.count(|a| {
            a.user_id.as_ref() == Some(user_id)
                && a.attempted_at >= since
                && a.counts_toward_lockout()
        }))
    }

    async fn count_for_ip_since(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self.count(|a| a.ip_address == ip_address && a.attempted_at >= since))
    }

    async fn count_failed_for_ip_since(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self.count(|a| {
            a.ip_address == ip_address && a.attempted_at >= since && a.is_failure()
        }))
    }

    async fn find_recent_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, Error> {
        let mut attempts = self.collect(|a| a.user_id.as_ref() == Some(user_id));
        attempts.sort_by_key(|a| std::cmp::Reverse(a.attempted_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let initial = self.attempts.len();
        self.attempts.retain(|_, attempt| attempt.attempted_at >= before);
        Ok(initial.saturating_sub(self.attempts.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use warden_core::attempt::FailureReason;

    use super::*;

    fn attempt(
        user_id: Option<&UserId>,
        ip: &str,
        reason: Option<FailureReason>,
        minutes_ago: i64,
    ) -> LoginAttempt {
        LoginAttempt {
            id: LoginAttemptId::new_random(),
            user_id: user_id.cloned(),
            identifier: "alice".to_string(),
            succeeded: reason.is_none(),
            failure_reason: reason,
            ip_address: ip.to_string(),
            user_agent: None,
            device_fingerprint: None,
            risk_score: 0.0,
            is_suspicious: false,
            triggered_lockout: false,
            session_id: None,
            attempted_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_lockout_failure_count_skips_locked_and_old() {
        let repo = MemoryLoginAttemptRepository::new();
        let user = UserId::new_random();
        let since = Utc::now() - Duration::minutes(60);

        for (reason, minutes_ago) in [
            (Some(FailureReason::InvalidCredentials), 5),
            (Some(FailureReason::InvalidCredentials), 10),
            (Some(FailureReason::AccountLocked), 2),
            (Some(FailureReason::InvalidCredentials), 90),
            (None, 1),
        ] {
            repo.create(attempt(Some(&user), "10.0.0.1", reason, minutes_ago))
                .await
                .unwrap();
        }

        assert_eq!(
            repo.count_lockout_failures_since(&user, since).await.unwrap(),
            2
        );
        assert_eq!(repo.count_for_ip_since("10.0.0.1", since).await.unwrap(), 4);
        assert_eq!(
            repo.count_failed_for_ip_since("10.0.0.1", since).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_ordering_and_retention() {
        let repo = MemoryLoginAttemptRepository::new();
        let user = UserId::new_random();
        for minutes_ago in [30, 10, 20] {
            repo.create(attempt(Some(&user), "10.0.0.1", None, minutes_ago))
                .await
                .unwrap();
        }
        repo.create(attempt(None, "10.0.0.9", Some(FailureReason::UserNotFound), 1))
            .await
            .unwrap();

        let oldest_first = repo
            .find_for_user_since(&user, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert!(oldest_first.windows(2).all(|w| w[0].attempted_at <= w[1].attempted_at));

        let recent = repo.find_recent_for_user(&user, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].attempted_at > recent[1].attempted_at);

        let deleted = repo
            .delete_older_than(Utc::now() - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
