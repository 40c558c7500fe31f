//! In-memory implementation of the security settings repository.

use async_trait::async_trait;
use dashmap::DashMap;
use warden_core::{
    Error, UserId,
    repositories::SecuritySettingsRepository,
    settings::{SecuritySettings, SettingsScope},
};

/// Records keyed by scope, so the global default and each user's override are unique.
#[derive(Default)]
pub struct MemorySettingsRepository {
    records: DashMap<SettingsScope, SecuritySettings>,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecuritySettingsRepository for MemorySettingsRepository {
    async fn get_or_create_global(
        &self,
        default: SecuritySettings,
    ) -> Result<SecuritySettings, Error> {
        let global = self
            .records
            .entry(SettingsScope::GlobalDefault)
            .or_insert_with(|| SecuritySettings {
                scope: SettingsScope::GlobalDefault,
                ..default
            });
        Ok(global.clone())
    }

    async fn find_for_user(&self, user_id: &UserId) -> Result<Option<SecuritySettings>, Error> {
        Ok(self
            .records
            .get(&SettingsScope::PerUser(user_id.clone()))
            .map(|settings| settings.clone()))
    }

    async fn upsert(&self, settings: SecuritySettings) -> Result<SecuritySettings, Error> {
        self.records.insert(settings.scope.clone(), settings.clone());
        Ok(settings)
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<bool, Error> {
        Ok(self
            .records
            .remove(&SettingsScope::PerUser(user_id.clone()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_global_is_created_once() {
        let repo = MemorySettingsRepository::new();
        let first = repo
            .get_or_create_global(SecuritySettings::default().with_max_failed_attempts(7))
            .await
            .unwrap();
        let second = repo
            .get_or_create_global(SecuritySettings::default())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.max_failed_attempts, 7);
    }

    #[tokio::test]
    async fn test_per_user_override() {
        let repo = MemorySettingsRepository::new();
        let user = UserId::new_random();
        let global = repo
            .get_or_create_global(SecuritySettings::default())
            .await
            .unwrap();

        repo.upsert(global.for_user(user.clone()).with_max_concurrent_sessions(2))
            .await
            .unwrap();
        let found = repo.find_for_user(&user).await.unwrap().unwrap();
        assert_eq!(found.max_concurrent_sessions, 2);

        assert!(repo.delete_for_user(&user).await.unwrap());
        assert!(!repo.delete_for_user(&user).await.unwrap());
        assert!(repo.find_for_user(&user).await.unwrap().is_none());
    }
}
