//! Security settings resolution and updates.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error, UserId,
    error::ValidationError,
    repositories::{SecuritySettingsRepository, SettingsRepositoryProvider},
    settings::{SecuritySettings, SettingsScope},
};

/// Allowed session timeout for self-service updates, in minutes.
pub const SESSION_TIMEOUT_RANGE: std::ops::RangeInclusive<i64> = 5..=1440;
/// Allowed concurrent session cap for self-service updates.
pub const MAX_SESSIONS_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

/// Resolves the effective policy for a user: the per-user override if present,
/// otherwise the global default (created from `defaults` on first use).
pub struct SecuritySettingsService<R: SettingsRepositoryProvider> {
    repository: Arc<R>,
    defaults: SecuritySettings,
}

impl<R: SettingsRepositoryProvider> SecuritySettingsService<R> {
    pub fn new(repository: Arc<R>, defaults: SecuritySettings) -> Self {
        Self {
            repository,
            defaults,
        }
    }

    pub async fn resolve(&self, user_id: &UserId) -> Result<SecuritySettings, Error> {
        if let Some(settings) = self.repository.settings().find_for_user(user_id).await? {
            return Ok(settings);
        }
        self.global().await
    }

    pub async fn global(&self) -> Result<SecuritySettings, Error> {
        self.repository
            .settings()
            .get_or_create_global(self.defaults.clone())
            .await
    }

    pub async fn update_global(
        &self,
        settings: SecuritySettings,
    ) -> Result<SecuritySettings, Error> {
        settings.validate()?;
        let current = self.global().await?;

        let updated = SecuritySettings {
            id: current.id,
            scope: SettingsScope::GlobalDefault,
            created_at: current.created_at,
            updated_at: Utc::now(),
            ..settings
        };
        let saved = self.repository.settings().upsert(updated).await?;
        tracing::info!("Updated global security settings");
        Ok(saved)
    }

    pub async fn update_for_user(
        &self,
        user_id: &UserId,
        settings: SecuritySettings,
    ) -> Result<SecuritySettings, Error> {
        settings.validate()?;
        let existing = self.repository.settings().find_for_user(user_id).await?;

        let mut updated = match existing {
            Some(current) => SecuritySettings {
                id: current.id,
                scope: current.scope,
                created_at: current.created_at,
                ..settings
            },
            None => settings.for_user(user_id.clone()),
        };
        updated.updated_at = Utc::now();

        let saved = self.repository.settings().upsert(updated).await?;
        tracing::info!(user_id = %user_id, "Updated per-user security settings");
        Ok(saved)
    }

    /// Drop the user's override so the global default applies again.
    pub async fn reset_for_user(&self, user_id: &UserId) -> Result<bool, Error> {
        let removed = self.repository.settings().delete_for_user(user_id).await?;
        if removed {
            tracing::info!(user_id = %user_id, "Reset security settings to global default");
        }
        Ok(removed)
    }

    /// Self-service change of the session timeout and concurrent session cap.
    pub async fn update_session_limits(
        &self,
        user_id: &UserId,
        session_timeout_minutes: i64,
        max_concurrent_sessions: u32,
    ) -> Result<SecuritySettings, Error> {
        if !SESSION_TIMEOUT_RANGE.contains(&session_timeout_minutes) {
            return Err(ValidationError::OutOfRange {
                field: "session_timeout_minutes",
                min: SESSION_TIMEOUT_RANGE.start().to_string(),
                max: SESSION_TIMEOUT_RANGE.end().to_string(),
            }
            .into());
        }
        if !MAX_SESSIONS_RANGE.contains(&max_concurrent_sessions) {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_sessions",
                min: MAX_SESSIONS_RANGE.start().to_string(),
                max: MAX_SESSIONS_RANGE.end().to_string(),
            }
            .into());
        }

        let current = self.resolve(user_id).await?;
        let updated = current
            .with_session_timeout_minutes(session_timeout_minutes)
            .with_max_concurrent_sessions(max_concurrent_sessions);
        self.update_for_user(user_id, updated).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MockSettingsRepository {
        records: Mutex<Vec<SecuritySettings>>,
    }

    #[async_trait]
    impl SecuritySettingsRepository for MockSettingsRepository {
        async fn get_or_create_global(
            &self,
            default: SecuritySettings,
        ) -> Result<SecuritySettings, Error> {
            let mut records = self.records.lock().unwrap();
            if let Some(global) = records.iter().find(|s| s.is_global()) {
                return Ok(global.clone());
            }
            records.push(default.clone());
            Ok(default)
        }

        async fn find_for_user(
            &self,
            user_id: &UserId,
        ) -> Result<Option<SecuritySettings>, Error> {
            let scope = SettingsScope::PerUser(user_id.clone());
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.scope == scope)
                .cloned())
        }

        async fn upsert(&self, settings: SecuritySettings) -> Result<SecuritySettings, Error> {
            let mut records = self.records.lock().unwrap();
            records.retain(|s| s.scope != settings.scope);
            records.push(settings.clone());
            Ok(settings)
        }

        async fn delete_for_user(&self, user_id: &UserId) -> Result<bool, Error> {
            let scope = SettingsScope::PerUser(user_id.clone());
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|s| s.scope != scope);
            Ok(records.len() != before)
        }
    }

    #[derive(Default)]
    struct MockProvider {
        settings: MockSettingsRepository,
    }

    impl SettingsRepositoryProvider for MockProvider {
        type SettingsRepo = MockSettingsRepository;

        fn settings(&self) -> &Self::SettingsRepo {
            &self.settings
        }
    }

    fn service() -> SecuritySettingsService<MockProvider> {
        SecuritySettingsService::new(
            Arc::new(MockProvider::default()),
            SecuritySettings::default(),
        )
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_global() {
        let service = service();
        let user_id = UserId::new_random();

        let resolved = service.resolve(&user_id).await.unwrap();
        assert!(resolved.is_global());

        let global_again = service.global().await.unwrap();
        assert_eq!(resolved.id, global_again.id, "global default is created once");
    }

    #[tokio::test]
    async fn test_per_user_override_and_reset() {
        let service = service();
        let user_id = UserId::new_random();

        let custom = SecuritySettings::default().with_max_failed_attempts(3);
        service.update_for_user(&user_id, custom).await.unwrap();

        let resolved = service.resolve(&user_id).await.unwrap();
        assert_eq!(resolved.scope, SettingsScope::PerUser(user_id.clone()));
        assert_eq!(resolved.max_failed_attempts, 3);

        assert!(service.reset_for_user(&user_id).await.unwrap());
        assert!(service.resolve(&user_id).await.unwrap().is_global());
        assert!(!service.reset_for_user(&user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let service = service();
        let result = service
            .update_global(SecuritySettings::default().with_lockout_multiplier(0.2))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_session_limits() {
        let service = service();
        let user_id = UserId::new_random();

        let updated = service
            .update_session_limits(&user_id, 30, 2)
            .await
            .unwrap();
        assert_eq!(updated.session_timeout_minutes, 30);
        assert_eq!(updated.max_concurrent_sessions, 2);
        assert!(!updated.is_global());

        for (timeout, sessions) in [(4, 2), (1441, 2), (30, 0), (30, 21)] {
            let result = service
                .update_session_limits(&user_id, timeout, sessions)
                .await;
            assert!(
                matches!(
                    result,
                    Err(Error::Validation(ValidationError::OutOfRange { .. }))
                ),
                "timeout {timeout} sessions {sessions} should be rejected"
            );
        }
    }
}
