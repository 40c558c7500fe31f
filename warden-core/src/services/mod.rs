//! Account-security services
//!
//! Each service is generic over the repository provider traits it needs, following the
//! same shape: an `Arc` of the provider plus configuration and shared collaborators.
//!
//! | Service                     | Concern                                         |
//! | --------------------------- | ----------------------------------------------- |
//! | [`SecuritySettingsService`] | effective per-user or global policy             |
//! | [`LockoutPolicyEngine`]     | creating, expiring and releasing lockouts       |
//! | [`LoginAttemptRecorder`]    | risk scoring and the lockout trigger            |
//! | [`MfaManager`]              | TOTP, backup codes, email OTP, recovery         |
//! | [`SessionManager`]          | concurrent limits, suspicious logins, expiry    |
//! | [`TokenIssuer`]             | access tokens and the blacklist                 |
//! | [`JwksPublisher`]           | the published verification keys                 |

pub mod attempts;
pub mod jwks;
pub mod lockout;
pub mod mfa;
pub mod session;
pub mod settings;
pub mod token;

pub use attempts::LoginAttemptRecorder;
pub use jwks::JwksPublisher;
pub use lockout::LockoutPolicyEngine;
pub use mfa::{MfaConfig, MfaManager, MfaRecovery};
pub use session::SessionManager;
pub use settings::SecuritySettingsService;
pub use token::TokenIssuer;
