//! In-memory implementation of the user repository.

use async_trait::async_trait;
use dashmap::DashMap;
use warden_core::{
    Error, User, UserId,
    error::StorageError,
    repositories::UserRepository,
};

#[derive(Default)]
pub struct MemoryUserRepository {
    users: DashMap<UserId, User>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, Error> {
        let taken = self.users.iter().any(|existing| {
            existing.username.eq_ignore_ascii_case(&user.username)
                || matches!(
                    (&existing.email, &user.email),
                    (Some(a), Some(b)) if a.eq_ignore_ascii_case(b)
                )
        });
        if taken || self.users.contains_key(&user.id) {
            return Err(StorageError::Constraint(format!(
                "user '{}' already exists",
                user.username
            ))
            .into());
        }

        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self.users.get(id).map(|user| user.clone()))
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, Error> {
        let identifier = identifier.trim();
        Ok(self
            .users
            .iter()
            .find(|user| {
                user.username.eq_ignore_ascii_case(identifier)
                    || user
                        .email
                        .as_deref()
                        .is_some_and(|email| email.eq_ignore_ascii_case(identifier))
            })
            .map(|user| user.clone()))
    }
}
