use std::fmt::Display;

use crate::{
    Error,
    error::{StorageError, ValidationError},
};

/// Extension trait for Result types to simplify storage error mapping
///
/// Storage backends use this to turn their own error types into warden errors.
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::error::utilities::StorageResultExt;
///
/// backend.insert(record).await.map_storage_err("Failed to insert lockout")?;
/// ```
pub trait StorageResultExt<T> {
    /// Convert an arbitrary backend error to a warden storage error with context
    fn map_storage_err(self, context: &str) -> Result<T, Error>;
}

impl<T, E: Display> StorageResultExt<T> for Result<T, E> {
    fn map_storage_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }
}

/// Extension trait for Option types to simplify required field validation
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::error::utilities::RequiredFieldExt;
///
/// let user_id = self.user_id.require_field("User ID")?;
/// ```
pub trait RequiredFieldExt<T> {
    /// Convert None to a ValidationError::MissingField
    fn require_field(self, field_name: &str) -> Result<T, ValidationError>;
}

impl<T> RequiredFieldExt<T> for Option<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError> {
        self.ok_or_else(|| ValidationError::MissingField(format!("{field_name} is required")))
    }
}

/// Log-and-ignore wrapper for side effects that must never change a security decision.
///
/// Audit writes, event handlers and alert emails all go through this so a failure is
/// recorded at `warn` and then dropped.
pub trait BestEffortExt<T> {
    /// Returns the value on success, or logs the error with `context` and returns `None`.
    fn best_effort(self, context: &str) -> Option<T>;
}

impl<T, E: Display> BestEffortExt<T> for Result<T, E> {
    fn best_effort(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, context, "Ignoring best-effort failure");
                None
            }
        }
    }
}
