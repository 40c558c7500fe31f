//! Repository trait for lockout records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Page, PageRequest};
use crate::{
    Error, UserId,
    id::LockoutId,
    lockout::{LockoutRecord, Release},
};

/// Storage for lockout records.
///
/// # Consistency
///
/// A user has at most one record with `is_active = true`. Backends uphold this through
/// [`activate`](Self::activate), which must release every other active record for the
/// user and insert the new one as a single step. Backends that cannot do this
/// atomically still converge: the next activation supersedes any stragglers.
#[async_trait]
pub trait LockoutRepository: Send + Sync + 'static {
    /// Release all active records for `lockout.user_id` with `supersede`, then insert `lockout`.
    ///
    /// Returns the inserted record and the records it superseded.
    async fn activate(
        &self,
        lockout: LockoutRecord,
        supersede: Release,
    ) -> Result<(LockoutRecord, Vec<LockoutRecord>), Error>;

    /// Release the record if it is still active.
    ///
    /// Returns the updated record, or `None` when it does not exist or was already released.
    async fn release(&self, id: &LockoutId, release: Release)
    -> Result<Option<LockoutRecord>, Error>;

    async fn find_by_id(&self, id: &LockoutId) -> Result<Option<LockoutRecord>, Error>;

    /// Records with the active flag set, regardless of their end time. Newest first.
    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Vec<LockoutRecord>, Error>;

    /// Number of lockouts for the user that started at or after `since`.
    async fn count_started_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// The user's lockouts, newest first.
    async fn find_history_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<LockoutRecord>, Error>;

    /// Lockouts that started at or after `since`, for one user or everyone.
    async fn find_started_since(
        &self,
        user_id: Option<&UserId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LockoutRecord>, Error>;

    /// Delete inactive records that started before `before`. Active records are never removed.
    async fn delete_inactive_before(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
