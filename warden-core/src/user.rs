//! Identity data consumed by the security engine
//!
//! Registration and profile management live elsewhere. The engine only reads the
//! fields it needs to mint token claims and address emails:
//!
//! | Field             | Type             | Description                                    |
//! | ----------------- | ---------------- | ---------------------------------------------- |
//! | `id`              | `UserId`         | The unique identifier for the user.            |
//! | `username`        | `String`         | Login name, used as the `name` claim.          |
//! | `email`           | `Option<String>` | Address for OTP delivery and security alerts.  |
//! | `first_name`      | `Option<String>` | Given name, used in claims and email greetings. |
//! | `last_name`       | `Option<String>` | Family name.                                   |
//! | `email_confirmed` | `bool`           | Whether the email address has been verified.   |
//! | `roles`           | `Vec<String>`    | Role names embedded in access tokens.          |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, error::utilities::RequiredFieldExt};

pub use crate::id::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn builder() -> UserBuilder {
        UserBuilder::default()
    }

    /// Name used in email greetings, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.first_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Default)]
pub struct UserBuilder {
    id: Option<UserId>,
    username: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email_confirmed: bool,
    roles: Vec<String>,
}

impl UserBuilder {
    pub fn id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    pub fn last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn email_confirmed(mut self, confirmed: bool) -> Self {
        self.email_confirmed = confirmed;
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn build(self) -> Result<User, Error> {
        let now = Utc::now();
        Ok(User {
            id: self.id.unwrap_or_default(),
            username: self.username.require_field("Username")?,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            email_confirmed: self.email_confirmed,
            roles: self.roles,
            created_at: now,
            updated_at: now,
        })
    }
}
