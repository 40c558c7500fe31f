//! In-memory storage backend for warden
//!
//! Every repository keeps its records in a [`dashmap::DashMap`], so the backend is safe
//! to share between tasks and needs no setup. Data lives as long as the provider.
//!
//! Intended for tests, development and single-process deployments that accept losing
//! security state on restart.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_storage_memory::MemoryRepositoryProvider;
//!
//! let storage = Arc::new(MemoryRepositoryProvider::new());
//! ```
pub mod repositories;

pub use repositories::{
    MemoryBackupCodeRepository, MemoryEmailOtpRepository, MemoryLockoutRepository,
    MemoryLoginAttemptRepository, MemoryMfaAuditRepository, MemoryMfaSettingsRepository,
    MemoryRepositoryProvider, MemorySessionRepository, MemorySettingsRepository,
    MemoryUserRepository,
};
