use async_trait::async_trait;

use crate::{Error, UserId, settings::SecuritySettings};

/// Storage for security settings
///
/// Exactly one global default record exists. It is created on first access from the
/// value passed to [`get_or_create_global`](Self::get_or_create_global).
#[async_trait]
pub trait SecuritySettingsRepository: Send + Sync + 'static {
    /// Load the global default, inserting `default` if none exists yet.
    async fn get_or_create_global(&self, default: SecuritySettings)
    -> Result<SecuritySettings, Error>;

    async fn find_for_user(&self, user_id: &UserId) -> Result<Option<SecuritySettings>, Error>;

    /// Insert or replace a record, keyed by its scope.
    async fn upsert(&self, settings: SecuritySettings) -> Result<SecuritySettings, Error>;

    /// Remove the per-user override. Returns whether one existed.
    async fn delete_for_user(&self, user_id: &UserId) -> Result<bool, Error>;
}
