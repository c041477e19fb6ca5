//! Named, time-bounded mutual exclusion.
//!
//! # Responsibility
//! - Define the injectable `LockService` backend contract.
//! - Provide `NamedLock` scoped acquisition (fail-fast or bounded blocking)
//!   returning a `LockGuard` that releases on every exit path.
//!
//! # Invariants
//! - A lease belongs to exactly one holder, identified by its token.
//! - Leases expire after their duration; expired leases may be taken over.
//! - Releasing a lease never removes a lease owned by someone else.
//! - Failure to obtain a lock is an error, never a silent proceed.

use crate::model::project::TenantId;
use crate::repo::RepoError;
use crate::retry::{RetryError, RetryPolicy, Transient};
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

mod memory;
mod sqlite;

pub use memory::InMemoryLockService;
pub use sqlite::SqliteLockService;

pub type LockResult<T> = Result<T, LockError>;

/// Lock acquisition and release failures.
#[derive(Debug)]
pub enum LockError {
    /// The key is currently held by another lease.
    Unavailable { key: String },
    /// Retries were exhausted while the key stayed held.
    Timeout { key: String, attempts: u32 },
    /// The backend itself failed.
    Backend(RepoError),
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { key } => write!(f, "lock `{key}` is held by another caller"),
            Self::Timeout { key, attempts } => write!(
                f,
                "lock `{key}` could not be acquired after {attempts} attempts"
            ),
            Self::Backend(err) => write!(f, "lock backend failure: {err}"),
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            Self::Unavailable { .. } | Self::Timeout { .. } => None,
        }
    }
}

impl From<RepoError> for LockError {
    fn from(value: RepoError) -> Self {
        Self::Backend(value)
    }
}

impl From<rusqlite::Error> for LockError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Backend(value.into())
    }
}

impl Transient for LockError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Proof of holding a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    token: Uuid,
}

impl LockLease {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: Uuid::new_v4(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

/// Backend contract for named locks.
pub trait LockService: Send + Sync {
    /// Takes the lock for `duration` or fails with `LockError::Unavailable`.
    fn try_acquire(&self, key: &str, duration: Duration) -> LockResult<LockLease>;
    /// Releases `lease` if it is still the current holder.
    fn release(&self, lease: &LockLease) -> LockResult<()>;
}

/// Builds the lock key serializing creation of one release.
///
/// Tenant ids are integers, so the first `:` after the id unambiguously
/// separates it from the version.
pub fn release_lock_key(tenant_id: TenantId, version: &str) -> String {
    format!("release:{tenant_id}:{version}")
}

/// A lock name bound to a backend and a lease duration.
pub struct NamedLock<'a> {
    service: &'a dyn LockService,
    key: String,
    duration: Duration,
}

impl<'a> NamedLock<'a> {
    pub fn new(service: &'a dyn LockService, key: impl Into<String>, duration: Duration) -> Self {
        Self {
            service,
            key: key.into(),
            duration,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Single attempt; fails with `LockError::Unavailable` when held.
    pub fn acquire(&self) -> LockResult<LockGuard<'a>> {
        let lease = self.service.try_acquire(&self.key, self.duration)?;
        debug!(
            "event=lock_acquire module=lock status=ok key={} duration_ms={}",
            self.key,
            self.duration.as_millis()
        );
        Ok(LockGuard {
            service: self.service,
            lease: Some(lease),
        })
    }

    /// Blocking acquire bounded by `policy`.
    ///
    /// # Errors
    /// - `LockError::Timeout` when every attempt found the lock held.
    /// - `LockError::Backend` immediately on backend failure.
    pub fn acquire_with(&self, policy: &RetryPolicy) -> LockResult<LockGuard<'a>> {
        policy.run(|| self.acquire()).map_err(|err| match err {
            RetryError::Exhausted { attempts, .. } => {
                warn!(
                    "event=lock_acquire module=lock status=timeout key={} attempts={attempts}",
                    self.key
                );
                LockError::Timeout {
                    key: self.key.clone(),
                    attempts,
                }
            }
            RetryError::Fatal(err) => err,
        })
    }
}

/// RAII guard that releases the lease when dropped.
pub struct LockGuard<'a> {
    service: &'a dyn LockService,
    lease: Option<LockLease>,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &str {
        self.lease.as_ref().map_or("", LockLease::key)
    }

    /// Releases now and reports backend failures to the caller.
    pub fn release(mut self) -> LockResult<()> {
        match self.lease.take() {
            Some(lease) => self.service.release(&lease),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(err) = self.service.release(&lease) {
                warn!(
                    "event=lock_release module=lock status=error key={} error={err}",
                    lease.key()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{release_lock_key, InMemoryLockService, LockError, NamedLock};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(30);

    #[test]
    fn release_lock_key_separates_tenants_and_versions() {
        assert_eq!(release_lock_key(1, "1.0"), "release:1:1.0");
        assert_ne!(release_lock_key(1, "1:0"), release_lock_key(11, "0"));
        assert_ne!(release_lock_key(1, "2.0"), release_lock_key(2, "2.0"));
    }

    #[test]
    fn acquire_fails_fast_while_held() {
        let service = InMemoryLockService::new();
        let lock = NamedLock::new(&service, "k", LEASE);
        let _held = lock.acquire().unwrap();

        let err = lock.acquire().err().unwrap();
        assert!(matches!(err, LockError::Unavailable { .. }));
    }

    #[test]
    fn guard_drop_releases_lock() {
        let service = InMemoryLockService::new();
        let lock = NamedLock::new(&service, "k", LEASE);
        {
            let guard = lock.acquire().unwrap();
            assert_eq!(guard.key(), "k");
        }
        lock.acquire().unwrap().release().unwrap();
        lock.acquire().unwrap();
    }

    #[test]
    fn guard_releases_on_early_error_return() {
        fn critical_section(lock: &NamedLock<'_>) -> Result<(), String> {
            let _guard = lock.acquire().map_err(|err| err.to_string())?;
            Err("failed inside lock".to_string())
        }

        let service = InMemoryLockService::new();
        let lock = NamedLock::new(&service, "k", LEASE);
        assert!(critical_section(&lock).is_err());
        lock.acquire().unwrap();
    }

    #[test]
    fn acquire_with_times_out_against_permanent_holder() {
        let service = InMemoryLockService::new();
        let lock = NamedLock::new(&service, "stuck", LEASE);
        let held = lock.acquire().unwrap();
        std::mem::forget(held);

        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let err = lock.acquire_with(&policy).err().unwrap();
        assert!(matches!(
            err,
            LockError::Timeout { ref key, attempts: 3 } if key == "stuck"
        ));
    }
}
