//! In-memory implementation of the lockout repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use warden_core::{
    Error, UserId,
    id::LockoutId,
    lockout::{LockoutRecord, Release},
    repositories::{LockoutRepository, Page, PageRequest},
};

/// Lockout records with a writer lock around activation and release.
///
/// The lock serializes the release-then-insert of [`LockoutRepository::activate`] so
/// concurrent activations for one user leave exactly one active record.
#[derive(Default)]
pub struct MemoryLockoutRepository {
    records: DashMap<LockoutId, LockoutRecord>,
    write_lock: Mutex<()>,
}

impl MemoryLockoutRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn for_user(&self, user_id: &UserId) -> Vec<LockoutRecord> {
        self.records
            .iter()
            .filter(|entry| &entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn apply_release(record: &mut LockoutRecord, release: &Release) {
    record.is_active = false;
    record.released_at = Some(release.released_at);
    record.release_reason = Some(release.reason);
    record.released_by = release.released_by.clone();
}

fn newest_first(records: &mut [LockoutRecord]) {
    records.sort_by_key(|record| std::cmp::Reverse(record.started_at));
}

#[async_trait]
impl LockoutRepository for MemoryLockoutRepository {
    async fn activate(
        &self,
        lockout: LockoutRecord,
        supersede: Release,
    ) -> Result<(LockoutRecord, Vec<LockoutRecord>), Error> {
        let _guard = self.write_lock.lock().await;

        let mut superseded = Vec::new();
        for mut entry in self.records.iter_mut() {
            if entry.user_id == lockout.user_id && entry.is_active {
                apply_release(entry.value_mut(), &supersede);
                superseded.push(entry.value().clone());
            }
        }

        self.records.insert(lockout.id.clone(), lockout.clone());
        Ok((lockout, superseded))
    }

    async fn release(
        &self,
        id: &LockoutId,
        release: Release,
    ) -> Result<Option<LockoutRecord>, Error> {
        let _guard = self.write_lock.lock().await;

        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(None);
        };
        if !record.is_active {
            return Ok(None);
        }
        apply_release(record.value_mut(), &release);
        Ok(Some(record.value().clone()))
    }

    async fn find_by_id(&self, id: &LockoutId) -> Result<Option<LockoutRecord>, Error> {
        Ok(self.records.get(id).map(|record| record.clone()))
    }

    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Vec<LockoutRecord>, Error> {
        let mut active: Vec<LockoutRecord> = self
            .for_user(user_id)
            .into_iter()
            .filter(|record| record.is_active)
            .collect();
        newest_first(&mut active);
        Ok(active)
    }

    async fn count_started_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self
            .records
            .iter()
            .filter(|entry| &entry.user_id == user_id && entry.started_at >= since)
            .count() as u64)
    }

    async fn find_history_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<LockoutRecord>, Error> {
        let mut history = self.for_user(user_id);
        newest_first(&mut history);
        Ok(Page::from_ordered(history, page))
    }

    async fn find_started_since(
        &self,
        user_id: Option<&UserId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LockoutRecord>, Error> {
        let mut records: Vec<LockoutRecord> = self
            .records
            .iter()
            .filter(|entry| {
                entry.started_at >= since && user_id.is_none_or(|id| &entry.user_id == id)
            })
            .map(|entry| entry.value().clone())
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn delete_inactive_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let _guard = self.write_lock.lock().await;

        let initial = self.records.len();
        self.records
            .retain(|_, record| record.is_active || record.started_at >= before);
        Ok(initial.saturating_sub(self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use warden_core::lockout::{LockoutReason, LockoutType, ReleaseReason};

    use super::*;

    fn record(user_id: &UserId, started_minutes_ago: i64) -> LockoutRecord {
        let started_at = Utc::now() - Duration::minutes(started_minutes_ago);
        LockoutRecord {
            id: LockoutId::new_random(),
            user_id: user_id.clone(),
            lockout_type: LockoutType::Automatic,
            reason: LockoutReason::FailedLoginAttempts,
            started_at,
            ends_at: Some(started_at + Duration::minutes(15)),
            duration_minutes: Some(15),
            failed_attempt_count: 5,
            level: 1,
            triggering_ip: None,
            is_manual: false,
            locked_by: None,
            details: None,
            is_active: true,
            released_at: None,
            release_reason: None,
            released_by: None,
        }
    }

    #[tokio::test]
    async fn test_activate_supersedes_previous() {
        let repo = MemoryLockoutRepository::new();
        let user = UserId::new_random();

        let (first, superseded) = repo
            .activate(record(&user, 5), Release::now(ReleaseReason::Superseded, None))
            .await
            .unwrap();
        assert!(superseded.is_empty());

        let (second, superseded) = repo
            .activate(record(&user, 0), Release::now(ReleaseReason::Superseded, None))
            .await
            .unwrap();
        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].id, first.id);
        assert_eq!(superseded[0].release_reason, Some(ReleaseReason::Superseded));

        let active = repo.find_active_for_user(&user).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_activation_leaves_one_active() {
        let repo = Arc::new(MemoryLockoutRepository::new());
        let user = UserId::new_random();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    repo.activate(record(&user, 0), Release::now(ReleaseReason::Superseded, None))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.find_active_for_user(&user).await.unwrap().len(), 1);
        assert_eq!(
            repo.count_started_since(&user, Utc::now() - Duration::hours(1))
                .await
                .unwrap(),
            16
        );
    }

    #[tokio::test]
    async fn test_release_only_once() {
        let repo = MemoryLockoutRepository::new();
        let user = UserId::new_random();
        let (lockout, _) = repo
            .activate(record(&user, 0), Release::now(ReleaseReason::Superseded, None))
            .await
            .unwrap();

        let released = repo
            .release(&lockout.id, Release::now(ReleaseReason::ManualRelease, None))
            .await
            .unwrap()
            .unwrap();
        assert!(!released.is_active);
        assert_eq!(released.release_reason, Some(ReleaseReason::ManualRelease));

        assert!(
            repo.release(&lockout.id, Release::now(ReleaseReason::ManualRelease, None))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_history_and_cleanup() {
        let repo = MemoryLockoutRepository::new();
        let user = UserId::new_random();
        for minutes_ago in [300, 200, 100] {
            repo.activate(
                record(&user, minutes_ago),
                Release::now(ReleaseReason::Superseded, None),
            )
            .await
            .unwrap();
        }

        let page = repo
            .find_history_for_user(&user, PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next());
        assert!(page.items[0].started_at > page.items[1].started_at);

        let deleted = repo
            .delete_inactive_before(Utc::now() - Duration::minutes(150))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.find_active_for_user(&user).await.unwrap().len(), 1);
    }
}
