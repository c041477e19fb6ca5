//! Core domain logic for idempotent release creation.
//! This crate is the single source of truth for release invariants.

pub mod config;
pub mod db;
pub mod lock;
pub mod logging;
pub mod model;
pub mod repo;
pub mod retry;
pub mod service;

pub use config::{ConfigError, CoreConfig, LockConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use lock::{
    release_lock_key, InMemoryLockService, LockError, LockGuard, LockService, NamedLock,
    SqliteLockService,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::activity::{Activity, ActivityKind};
pub use model::project::{Project, ProjectId, TenantId};
pub use model::release::{NewRelease, Release, ReleaseId, ReleaseValidationError};
pub use repo::{RepoError, RepoResult};
pub use retry::{RetryError, RetryPolicy};
pub use service::notification_dispatcher::{
    DispatchReport, LogNotifier, NotifyError, ReleaseNotifier,
};
pub use service::release_creation::{
    CreateOutcome, CreateReleaseError, CreateReleaseRequest, ReleaseCreation,
    ReleaseCreationService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
