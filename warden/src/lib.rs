//! # Warden
//!
//! Warden is the account-security layer you put behind your own credential check. It
//! records every login attempt, scores its risk, locks accounts progressively, runs
//! multi-factor verification, caps concurrent sessions and issues revocable access tokens.
//!
//! Warden never sees passwords. [`Warden::login`] takes a closure that checks the primary
//! credential for the resolved user, so any password hashing scheme or external identity
//! check fits in front of it.
//!
//! ## Storage Support
//!
//! Storage is pluggable through [`RepositoryProvider`]. The `memory` feature (on by
//! default) provides [`MemoryRepositoryProvider`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden::{JwtConfig, LoginOutcome, LoginRequest, WardenBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warden = WardenBuilder::new()
//!         .with_memory_storage()
//!         .with_jwt_config(JwtConfig::new_hs256(b"a-very-long-development-only-secret".to_vec()))
//!         .build()
//!         .await?;
//!
//!     let request = LoginRequest::new("alice@example.com", "203.0.113.7");
//!     match warden.login(request, |_user| true).await? {
//!         LoginOutcome::Authenticated(session) => println!("token: {}", session.access_token.token),
//!         LoginOutcome::MfaRequired { methods, .. } => println!("second factor needed: {methods:?}"),
//!     }
//!     Ok(())
//! }
//! ```
use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use warden_core::{
    attempt::{FailureReason, NewLoginAttempt, RecordedAttempt},
    crypto::{self, SecretCipher},
    error::{AuthError, MfaError, TokenError, utilities::BestEffortExt},
    lockout::{LockoutReason, LockoutType},
    mailer::{EmailSender, TracingEmailSender},
    mfa::MfaAction,
    repositories::{PageRequest, UserRepository, UserRepositoryProvider},
    services::{
        JwksPublisher, LockoutPolicyEngine, LoginAttemptRecorder, MfaManager,
        SecuritySettingsService, SessionManager, TokenIssuer,
    },
    session::NewSession,
};

mod builder;
mod config;

pub use builder::{NoStorage, WardenBuilder, WardenBuilderError, WithStorage};
pub use config::{ConfigError, DEFAULT_CLEANUP_INTERVAL, WardenConfig};

/// Re-export core types from warden_core
///
/// These types are commonly used when working with the Warden API.
pub use warden_core::{
    Error, RepositoryProvider, SessionId, User, UserBuilder, UserId,
    cache::{CacheTier, MemoryCacheTier, TieredCache},
    events::{EventBus, EventHandler, SecurityEvent},
    lockout::LockoutRecord,
    mailer::MemoryEmailSender,
    mfa::{BackupCodeBatch, ClientInfo, MfaMethod, MfaStatus, TotpEnrollment},
    services::MfaConfig,
    session::{Session, TerminationReason},
    settings::SecuritySettings,
    token::{AccessClaims, IssuedAccessToken, JwtConfig, jwks::Jwks},
};

#[cfg(feature = "memory")]
pub use warden_storage_memory::MemoryRepositoryProvider;

/// Purpose under which login one-time passwords are sent and verified.
pub const EMAIL_OTP_LOGIN_PURPOSE: &str = "login";

/// Backup code batches a user may generate per day, enrollment included.
pub const BACKUP_CODE_REGENERATION_LIMIT: usize = 3;

const MFA_CHALLENGE_TTL: StdDuration = StdDuration::from_secs(5 * 60);
const MFA_CHALLENGE_KEY_PREFIX: &str = "mfa_challenge:";
const SESSION_TOKEN_BYTES: usize = 32;

/// A login as presented by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Email or username
    pub identifier: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub device_info: Option<String>,
    /// "City, Region, Country" when the caller can geolocate the address
    pub location: Option<String>,
}

impl LoginRequest {
    pub fn new(identifier: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ip_address: ip_address.into(),
            ..Default::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_device_info(mut self, device_info: impl Into<String>) -> Self {
        self.device_info = Some(device_info.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn client(&self) -> ClientInfo {
        ClientInfo::new(self.ip_address.clone(), self.user_agent.clone())
    }

    fn attempt(&self, user_id: Option<&UserId>, failure: Option<FailureReason>) -> NewLoginAttempt {
        let mut attempt = match (user_id, failure) {
            (Some(user_id), None) => {
                NewLoginAttempt::success(user_id.clone(), &self.identifier, &self.ip_address)
            }
            (user_id, reason) => NewLoginAttempt::failure(
                user_id.cloned(),
                &self.identifier,
                &self.ip_address,
                reason.unwrap_or(FailureReason::Other),
            ),
        };
        attempt.user_agent = self.user_agent.clone();
        attempt.device_fingerprint = self.device_fingerprint.clone();
        attempt
    }
}

/// A signed-in user with a fresh session and token pair.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: User,
    pub session: Session,
    pub access_token: IssuedAccessToken,
    pub refresh_token: String,
    /// Older sessions closed to stay under the concurrent session limit
    pub terminated_sessions: Vec<Session>,
    pub suspicious: bool,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Box<AuthenticatedSession>),
    /// The primary credential was accepted. Finish with [`Warden::complete_mfa_login`].
    MfaRequired {
        challenge_token: String,
        user_id: UserId,
        methods: Vec<MfaMethod>,
    },
}

/// What [`Warden::report_compromise`] did.
#[derive(Debug, Clone)]
pub struct CompromiseReport {
    pub lockout: LockoutRecord,
    pub sessions_terminated: u64,
    pub token_revoked: bool,
}

/// Rows removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub email_otps: u64,
    pub lockouts: u64,
    pub login_attempts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MfaChallenge {
    user_id: UserId,
    request: LoginRequest,
}

fn challenge_key(challenge_token: &str) -> String {
    format!("{MFA_CHALLENGE_KEY_PREFIX}{}", crypto::hash_token(challenge_token))
}

/// Everything needed to assemble a [`Warden`].
pub(crate) struct Components<R: RepositoryProvider> {
    pub repositories: Arc<R>,
    pub jwt: JwtConfig,
    pub security_defaults: SecuritySettings,
    pub mfa_config: MfaConfig,
    pub cipher: SecretCipher,
    pub mailer: Arc<dyn EmailSender>,
    pub cache: TieredCache,
    pub events: EventBus,
    pub cleanup_interval: StdDuration,
}

/// The account-security coordinator.
///
/// `Warden` wires the security services over one storage provider and runs the flows that
/// span several of them: login, second-factor completion, token refresh, logout and
/// incident response. The services stay reachable through accessors for everything else.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use warden::{JwtConfig, MemoryRepositoryProvider, Warden};
///
/// let repositories = Arc::new(MemoryRepositoryProvider::new());
/// let warden = Warden::new(repositories, JwtConfig::new_hs256(b"development-secret".to_vec()));
/// ```
pub struct Warden<R: RepositoryProvider> {
    repositories: Arc<R>,
    settings: Arc<SecuritySettingsService<R>>,
    lockouts: Arc<LockoutPolicyEngine<R>>,
    attempts: Arc<LoginAttemptRecorder<R>>,
    mfa: Arc<MfaManager<R>>,
    sessions: Arc<SessionManager<R>>,
    tokens: Arc<TokenIssuer>,
    jwks: Arc<JwksPublisher>,
    cache: TieredCache,
    events: EventBus,
    cleanup_interval: StdDuration,
}

impl<R: RepositoryProvider> Warden<R> {
    /// Create a Warden with default policies, an in-process cache and a logging mailer.
    ///
    /// TOTP secrets are sealed with a key generated for this process, so enrollments do
    /// not survive a restart. Use [`WardenBuilder`] to supply a persistent key.
    pub fn new(repositories: Arc<R>, jwt: JwtConfig) -> Self {
        Self::from_components(Components {
            repositories,
            jwt,
            security_defaults: SecuritySettings::default(),
            mfa_config: MfaConfig::default(),
            cipher: SecretCipher::random(),
            mailer: Arc::new(TracingEmailSender),
            cache: TieredCache::in_memory(),
            events: EventBus::new(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        })
    }

    pub(crate) fn from_components(components: Components<R>) -> Self {
        let Components {
            repositories,
            jwt,
            security_defaults,
            mfa_config,
            cipher,
            mailer,
            cache,
            events,
            cleanup_interval,
        } = components;

        let settings = Arc::new(SecuritySettingsService::new(
            repositories.clone(),
            security_defaults,
        ));
        let lockouts = Arc::new(LockoutPolicyEngine::new(
            repositories.clone(),
            settings.clone(),
            events.clone(),
        ));
        let attempts = Arc::new(LoginAttemptRecorder::new(
            repositories.clone(),
            settings.clone(),
            lockouts.clone(),
            events.clone(),
        ));
        let mfa = Arc::new(MfaManager::new(
            repositories.clone(),
            cipher,
            mailer.clone(),
            cache.clone(),
            events.clone(),
            mfa_config,
        ));
        let sessions = Arc::new(SessionManager::new(
            repositories.clone(),
            settings.clone(),
            mailer,
            events.clone(),
        ));
        let tokens = Arc::new(TokenIssuer::new(jwt.clone(), cache.clone(), events.clone()));
        let jwks = Arc::new(JwksPublisher::new(jwt, cache.clone()));

        Self {
            repositories,
            settings,
            lockouts,
            attempts,
            mfa,
            sessions,
            tokens,
            jwks,
            cache,
            events,
            cleanup_interval,
        }
    }

    pub fn repositories(&self) -> &Arc<R> {
        &self.repositories
    }

    pub fn settings(&self) -> &SecuritySettingsService<R> {
        &self.settings
    }

    pub fn lockouts(&self) -> &LockoutPolicyEngine<R> {
        &self.lockouts
    }

    pub fn attempts(&self) -> &LoginAttemptRecorder<R> {
        &self.attempts
    }

    pub fn mfa(&self) -> &MfaManager<R> {
        &self.mfa
    }

    pub fn sessions(&self) -> &SessionManager<R> {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn jwks(&self) -> &JwksPublisher {
        &self.jwks
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Health check for the storage backend
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    /// Authenticate a login request.
    ///
    /// The user is resolved from `request.identifier` and `credential_check` decides whether
    /// the presented primary credential is valid for them. Every outcome is recorded as a
    /// login attempt and failures count toward a lockout.
    ///
    /// # Errors
    ///
    /// - [`AuthError::IpBlocked`] when the source address produced too many failures
    /// - [`AuthError::InvalidCredentials`] for an unknown identifier or a rejected credential
    /// - [`AuthError::LockedOut`] when the account is locked, including by this attempt
    pub async fn login<F>(
        &self,
        request: LoginRequest,
        credential_check: F,
    ) -> Result<LoginOutcome, Error>
    where
        F: FnOnce(&User) -> bool,
    {
        if self.attempts.should_block_ip(&request.ip_address).await? {
            tracing::warn!(ip_address = %request.ip_address, "Rejecting login from blocked address");
            return Err(AuthError::IpBlocked.into());
        }

        let Some(user) = self
            .repositories
            .user()
            .find_by_identifier(&request.identifier)
            .await?
        else {
            self.record_failure(None, &request, FailureReason::UserNotFound)
                .await?;
            return Err(AuthError::InvalidCredentials.into());
        };

        if let Some(lockout) = self.lockouts.get_active(&user.id).await? {
            self.record_failure(Some(&user.id), &request, FailureReason::AccountLocked)
                .await?;
            return Err(AuthError::LockedOut {
                until: lockout.ends_at,
            }
            .into());
        }

        if !credential_check(&user) {
            let recorded = self
                .record_failure(Some(&user.id), &request, FailureReason::InvalidCredentials)
                .await?;
            return Err(locked_or(recorded, AuthError::InvalidCredentials));
        }

        if self.mfa.is_enabled(&user.id).await? {
            let methods = self.mfa.status(&user.id).await?.methods;
            let challenge_token = crypto::generate_secure_token(SESSION_TOKEN_BYTES);
            self.cache
                .set(
                    &challenge_key(&challenge_token),
                    &MfaChallenge {
                        user_id: user.id.clone(),
                        request,
                    },
                    MFA_CHALLENGE_TTL,
                )
                .await?;

            tracing::info!(user_id = %user.id, "Primary credential accepted, second factor required");
            return Ok(LoginOutcome::MfaRequired {
                challenge_token,
                user_id: user.id,
                methods,
            });
        }

        let authenticated = self.establish_session(user, &request).await?;
        Ok(LoginOutcome::Authenticated(Box::new(authenticated)))
    }

    /// Finish a login that returned [`LoginOutcome::MfaRequired`].
    ///
    /// A wrong code is recorded as a failed login and counts toward a lockout. The
    /// challenge stays valid for another try until it expires or the account locks.
    pub async fn complete_mfa_login(
        &self,
        challenge_token: &str,
        method: MfaMethod,
        code: &str,
    ) -> Result<AuthenticatedSession, Error> {
        let key = challenge_key(challenge_token);
        let Some(challenge) = self.cache.get::<MfaChallenge>(&key).await? else {
            return Err(TokenError::Invalid("unknown or expired MFA challenge".to_string()).into());
        };
        let user_id = &challenge.user_id;

        if let Some(lockout) = self.lockouts.get_active(user_id).await? {
            self.cache.remove(&key).await.best_effort("discard MFA challenge");
            return Err(AuthError::LockedOut {
                until: lockout.ends_at,
            }
            .into());
        }

        let client = challenge.request.client();
        let verified = match method {
            MfaMethod::Totp => self.mfa.verify_totp(user_id, code, &client).await?,
            MfaMethod::BackupCode => self.mfa.verify_backup_code(user_id, code, &client).await?,
            MfaMethod::EmailOtp => {
                self.mfa
                    .verify_email_otp(user_id, code, EMAIL_OTP_LOGIN_PURPOSE, &client)
                    .await?
            }
        };

        if !verified {
            let recorded = self
                .record_failure(Some(user_id), &challenge.request, FailureReason::InvalidMfaCode)
                .await?;
            if recorded.lockout.is_some() {
                self.cache.remove(&key).await.best_effort("discard MFA challenge");
            }
            return Err(locked_or(recorded, MfaError::InvalidCode));
        }

        self.cache.remove(&key).await?;
        let user = self.require_user(user_id).await?;
        self.establish_session(user, &challenge.request).await
    }

    /// Verify an access token and check the account is not locked.
    pub async fn authorize(&self, access_token: &str) -> Result<AccessClaims, Error> {
        let claims = self.tokens.verify(access_token).await?;
        if let Some(lockout) = self.lockouts.get_active(&claims.user_id()).await? {
            return Err(AuthError::LockedOut {
                until: lockout.ends_at,
            }
            .into());
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new token pair on the same session.
    ///
    /// Both the session token and the refresh token rotate, so the presented refresh
    /// token cannot be used again.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthenticatedSession, Error> {
        let Some(session) = self.sessions.find_by_refresh_token(refresh_token).await? else {
            return Err(TokenError::Invalid("unknown or expired refresh token".to_string()).into());
        };

        if let Some(lockout) = self.lockouts.get_active(&session.user_id).await? {
            return Err(AuthError::LockedOut {
                until: lockout.ends_at,
            }
            .into());
        }

        let user = self.require_user(&session.user_id).await?;
        let refresh_token = self.tokens.issue_refresh_token();
        let Some(session) = self
            .sessions
            .rotate_tokens(
                &session.id,
                crypto::generate_secure_token(SESSION_TOKEN_BYTES),
                refresh_token.clone(),
            )
            .await?
        else {
            return Err(TokenError::Invalid("session ended during refresh".to_string()).into());
        };
        let access_token = self.tokens.issue_access_token(&user)?;

        tracing::debug!(user_id = %user.id, session_id = %session.id, "Rotated session tokens");
        Ok(AuthenticatedSession {
            user,
            session,
            access_token,
            refresh_token,
            terminated_sessions: Vec::new(),
            suspicious: false,
        })
    }

    /// End the session holding `session_token` and revoke the access token if given.
    ///
    /// Returns whether a live session was ended.
    pub async fn logout(
        &self,
        session_token: &str,
        access_token: Option<&str>,
    ) -> Result<bool, Error> {
        let ended = self
            .sessions
            .terminate_by_token(session_token, TerminationReason::Logout)
            .await?;
        if let Some(token) = access_token {
            self.tokens.revoke(token).await?;
        }
        Ok(ended)
    }

    /// End every session of the user.
    ///
    /// Access tokens are self-contained and keep working until they expire unless revoked.
    /// Pass the caller's own token to revoke it in the same step.
    pub async fn revoke_all_sessions(
        &self,
        user_id: &UserId,
        access_token: Option<&str>,
    ) -> Result<u64, Error> {
        let terminated = self
            .sessions
            .terminate_all(user_id, TerminationReason::RevokedAll)
            .await?;
        if let Some(token) = access_token {
            self.tokens.revoke(token).await?;
        }
        tracing::info!(user_id = %user_id, count = terminated, "Revoked all sessions");
        Ok(terminated)
    }

    /// Respond to a compromised account: lock it until released, end every session and
    /// revoke the given access token.
    pub async fn report_compromise(
        &self,
        user_id: &UserId,
        reported_by: Option<UserId>,
        details: Option<String>,
        access_token: Option<&str>,
    ) -> Result<CompromiseReport, Error> {
        let lockout = self
            .lockouts
            .lock_manual(
                user_id,
                LockoutType::CompromisedAccount,
                LockoutReason::CompromisedAccount,
                None,
                reported_by,
                details,
            )
            .await?;
        let sessions_terminated = self
            .sessions
            .terminate_all(user_id, TerminationReason::SecurityIncident)
            .await?;
        let token_revoked = match access_token {
            Some(token) => self.tokens.revoke(token).await?,
            None => false,
        };

        tracing::warn!(
            user_id = %user_id,
            lockout_id = %lockout.id,
            sessions_terminated,
            "Account reported compromised"
        );
        Ok(CompromiseReport {
            lockout,
            sessions_terminated,
            token_revoked,
        })
    }

    /// Send an email one-time password, at most `otp_send_limit` per `otp_send_window`.
    pub async fn send_email_otp(&self, user_id: &UserId, purpose: &str) -> Result<bool, Error> {
        let config = self.mfa.config();
        let recent = self
            .mfa
            .get_recent_otp_attempts(user_id, purpose, config.otp_send_window)
            .await?;
        if recent >= config.otp_send_limit {
            tracing::warn!(user_id = %user_id, purpose, recent, "Email OTP send limit reached");
            return Err(MfaError::RateLimited.into());
        }
        self.mfa.send_email_otp(user_id, purpose, None).await
    }

    /// Replace the user's backup codes, at most [`BACKUP_CODE_REGENERATION_LIMIT`] batches a day.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: &UserId,
        client: &ClientInfo,
    ) -> Result<BackupCodeBatch, Error> {
        let since = Utc::now() - Duration::hours(24);
        let recent = self
            .mfa
            .audit_log(user_id, PageRequest::new(1, 100))
            .await?
            .items
            .iter()
            .filter(|entry| {
                entry.action == MfaAction::BackupCodesGenerated
                    && entry.success
                    && entry.created_at >= since
            })
            .count();
        if recent >= BACKUP_CODE_REGENERATION_LIMIT {
            tracing::warn!(user_id = %user_id, recent, "Backup code regeneration limit reached");
            return Err(MfaError::RateLimited.into());
        }
        self.mfa.regenerate_backup_codes(user_id, client).await
    }

    /// Run every cleanup batch once.
    pub async fn run_cleanup(&self) -> CleanupReport {
        let (_tx, rx) = watch::channel(false);
        self.cleanup_jobs().run(&rx).await
    }

    /// Start the background cleanup task.
    ///
    /// Every cleanup interval the task removes expired sessions and email OTPs, lockout
    /// history past four times the retention period and login attempts past the retention
    /// period. A shutdown signal is honoured between batches, never inside one.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - A watch receiver that signals when to stop the task
    pub fn start_cleanup_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let jobs = self.cleanup_jobs();
        let interval = self.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let report = jobs.run(&shutdown).await;
                        tracing::debug!(?report, "Cleanup pass finished");
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down warden cleanup task");
                        break;
                    }
                }
            }
        })
    }

    fn cleanup_jobs(&self) -> CleanupJobs<R> {
        CleanupJobs {
            settings: Arc::clone(&self.settings),
            lockouts: Arc::clone(&self.lockouts),
            attempts: Arc::clone(&self.attempts),
            mfa: Arc::clone(&self.mfa),
            sessions: Arc::clone(&self.sessions),
        }
    }

    async fn establish_session(
        &self,
        user: User,
        request: &LoginRequest,
    ) -> Result<AuthenticatedSession, Error> {
        let refresh_token = self.tokens.issue_refresh_token();
        let created = self
            .sessions
            .create_session(NewSession {
                user_id: user.id.clone(),
                session_token: crypto::generate_secure_token(SESSION_TOKEN_BYTES),
                refresh_token: refresh_token.clone(),
                ip_address: request.ip_address.clone(),
                user_agent: request.user_agent.clone(),
                device_info: request.device_info.clone(),
                location: request.location.clone(),
            })
            .await?;

        self.attempts
            .record_attempt(
                request
                    .attempt(Some(&user.id), None)
                    .with_session_id(created.session.id.clone()),
            )
            .await?;
        let access_token = self.tokens.issue_access_token(&user)?;

        tracing::info!(
            user_id = %user.id,
            session_id = %created.session.id,
            suspicious = created.suspicious,
            "Login succeeded"
        );
        Ok(AuthenticatedSession {
            user,
            session: created.session,
            access_token,
            refresh_token,
            terminated_sessions: created.terminated_sessions,
            suspicious: created.suspicious,
        })
    }

    async fn record_failure(
        &self,
        user_id: Option<&UserId>,
        request: &LoginRequest,
        reason: FailureReason,
    ) -> Result<RecordedAttempt, Error> {
        self.attempts
            .record_attempt(request.attempt(user_id, Some(reason)))
            .await
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, Error> {
        self.repositories
            .user()
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }
}

/// The lockout an attempt triggered, or `otherwise`.
fn locked_or(recorded: RecordedAttempt, otherwise: impl Into<Error>) -> Error {
    match recorded.lockout {
        Some(lockout) => AuthError::LockedOut {
            until: lockout.ends_at,
        }
        .into(),
        None => otherwise.into(),
    }
}

#[derive(Debug, Clone, Copy)]
enum CleanupBatch {
    Sessions,
    EmailOtps,
    Lockouts,
    LoginAttempts,
}

impl CleanupBatch {
    const ALL: [CleanupBatch; 4] = [
        CleanupBatch::Sessions,
        CleanupBatch::EmailOtps,
        CleanupBatch::Lockouts,
        CleanupBatch::LoginAttempts,
    ];
}

struct CleanupJobs<R: RepositoryProvider> {
    settings: Arc<SecuritySettingsService<R>>,
    lockouts: Arc<LockoutPolicyEngine<R>>,
    attempts: Arc<LoginAttemptRecorder<R>>,
    mfa: Arc<MfaManager<R>>,
    sessions: Arc<SessionManager<R>>,
}

impl<R: RepositoryProvider> CleanupJobs<R> {
    async fn run(&self, shutdown: &watch::Receiver<bool>) -> CleanupReport {
        let mut report = CleanupReport::default();

        for batch in CleanupBatch::ALL {
            if *shutdown.borrow() {
                tracing::info!(?batch, "Stopping cleanup before batch, shutdown requested");
                break;
            }

            let result = match batch {
                CleanupBatch::Sessions => self.sessions.cleanup_expired().await.map(|n| {
                    report.sessions = n;
                }),
                CleanupBatch::EmailOtps => self.mfa.cleanup_expired_otps().await.map(|n| {
                    report.email_otps = n;
                }),
                CleanupBatch::Lockouts => self.lockouts.cleanup_history().await.map(|n| {
                    report.lockouts = n;
                }),
                CleanupBatch::LoginAttempts => self.cleanup_attempts().await.map(|n| {
                    report.login_attempts = n;
                }),
            };

            if let Err(e) = result {
                tracing::warn!(error = %e, ?batch, "Cleanup batch failed");
            }
        }
        report
    }

    async fn cleanup_attempts(&self) -> Result<u64, Error> {
        let retention_days = self.settings.global().await?.retention_days;
        self.attempts.cleanup_old_attempts(retention_days).await
    }
}
