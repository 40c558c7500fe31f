use async_trait::async_trait;

use crate::{Error, User, UserId};

/// Read access to user identity data
///
/// The security engine does not manage accounts; this is the narrow view it needs to
/// resolve login identifiers and fill token claims and email greetings.
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Store a user. Used by hosts that keep identities in the same backend.
    async fn create(&self, user: User) -> Result<User, Error>;

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error>;

    /// Resolve a login identifier, matching username or email case-insensitively.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, Error>;
}
