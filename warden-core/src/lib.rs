//! Core functionality for the warden account-security engine
//!
//! This crate holds the domain types, the repository traits storage backends implement,
//! and the services that make security decisions:
//!
//! - login attempt recording with risk scoring and progressive lockouts
//! - multi-factor authentication with TOTP, backup codes and email one-time passwords
//! - session tracking with concurrency limits and suspicious-login detection
//! - access token issuance, revocation and key set publication
//!
//! The core crate is meant to be used by storage backends and by the `warden` facade.
//! Application code normally goes through `warden::Warden` instead.
//!
//! See [`services`] for the service layer and [`repositories`] for the storage contract.
pub mod attempt;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod events;
pub mod id;
pub mod lockout;
pub mod mailer;
pub mod mfa;
pub mod repositories;
pub mod risk;
pub mod services;
pub mod session;
pub mod settings;
pub mod token;
pub mod totp;
pub mod user;

pub use error::Error;
pub use id::{SessionId, UserId};
pub use repositories::RepositoryProvider;
pub use user::{User, UserBuilder};
