use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    attempt::FailureReason,
    error::{EventError, utilities::BestEffortExt},
    id::{LockoutId, SessionId, UserId},
    lockout::{LockoutReason, ReleaseReason},
    session::TerminationReason,
};

/// Security-relevant state changes published by the services
///
/// Handlers receive these after the decision has already been persisted, so they are
/// suited to alerting, metrics and audit forwarding. Nothing a handler does can
/// change the outcome of the operation that emitted the event.
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// A login attempt failed.
    LoginFailed {
        user_id: Option<UserId>,
        identifier: String,
        ip_address: String,
        reason: FailureReason,
        risk_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A lockout became active for a user.
    AccountLocked {
        user_id: UserId,
        lockout_id: LockoutId,
        reason: LockoutReason,
        level: u32,
        /// `None` for an indefinite lockout
        locked_until: Option<DateTime<Utc>>,
        triggering_ip: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A lockout was released, manually or because it ran out.
    AccountUnlocked {
        user_id: UserId,
        lockout_id: LockoutId,
        reason: ReleaseReason,
        released_by: Option<UserId>,
        timestamp: DateTime<Utc>,
    },

    MfaEnabled {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    MfaDisabled {
        user_id: UserId,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    SessionCreated {
        user_id: UserId,
        session_id: SessionId,
        suspicious: bool,
        timestamp: DateTime<Utc>,
    },

    SessionTerminated {
        user_id: UserId,
        session_id: SessionId,
        reason: TerminationReason,
        timestamp: DateTime<Utc>,
    },

    /// A new session came from an IP, browser or country not seen in the last 30 days.
    SuspiciousLogin {
        user_id: UserId,
        session_id: SessionId,
        ip_address: String,
        location: String,
        timestamp: DateTime<Utc>,
    },

    /// An access token was placed on the blacklist.
    TokenRevoked {
        token_id: String,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl SecurityEvent {
    /// Stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::LoginFailed { .. } => "login_failed",
            SecurityEvent::AccountLocked { .. } => "account_locked",
            SecurityEvent::AccountUnlocked { .. } => "account_unlocked",
            SecurityEvent::MfaEnabled { .. } => "mfa_enabled",
            SecurityEvent::MfaDisabled { .. } => "mfa_disabled",
            SecurityEvent::SessionCreated { .. } => "session_created",
            SecurityEvent::SessionTerminated { .. } => "session_terminated",
            SecurityEvent::SuspiciousLogin { .. } => "suspicious_login",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
        }
    }
}

/// A trait for handling events emitted by the event bus
///
/// Implementors can be registered with the [`EventBus`] and are called in registration
/// order for each event.
///
/// # Examples
///
/// ```rust,ignore
/// struct AlertHandler;
///
/// #[async_trait]
/// impl EventHandler for AlertHandler {
///     async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError> {
///         if let SecurityEvent::AccountLocked { user_id, .. } = event {
///             page_on_call(user_id).await;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError>;
}

/// Fan-out of security events to registered handlers
///
/// Emission is best effort. A failing handler is logged and skipped, and the remaining
/// handlers still run.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Deliver `event` to every handler.
    pub async fn emit(&self, event: &SecurityEvent) {
        for handler in self.handlers.read().await.iter() {
            handler
                .handle_event(event)
                .await
                .best_effort(event.kind());
        }
    }
}
