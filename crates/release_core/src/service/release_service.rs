//! Idempotent release get-or-create.
//!
//! # Responsibility
//! - Return the existing release for `(tenant_id, version)` or create it.
//! - Serialize first creation of one release behind a named lock.
//!
//! # Invariants
//! - The fast path takes no lock.
//! - Existence is re-checked while the lock is held before inserting.
//! - An insert conflict observed under the lock is a consistency failure,
//!   never a second "created" result.
//! - Distinct `(tenant_id, version)` pairs never contend on the same lock.

use crate::lock::{release_lock_key, LockError, LockService, NamedLock};
use crate::model::project::TenantId;
use crate::model::release::{NewRelease, Release, ReleaseValidationError};
use crate::repo::release_repo::{InsertOutcome, ReleaseRepository};
use crate::repo::RepoError;
use crate::retry::RetryPolicy;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Errors from release get-or-create.
#[derive(Debug)]
pub enum ReleaseServiceError {
    /// Input rejected before any lock or write.
    Validation(ReleaseValidationError),
    /// The creation lock could not be obtained.
    Lock(LockError),
    /// A second release row was about to be created for one key.
    DuplicateRelease {
        tenant_id: TenantId,
        version: String,
    },
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for ReleaseServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Lock(err) => write!(f, "{err}"),
            Self::DuplicateRelease { tenant_id, version } => write!(
                f,
                "release `{version}` for tenant {tenant_id} already existed while holding its creation lock"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReleaseServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Lock(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::DuplicateRelease { .. } => None,
        }
    }
}

impl From<RepoError> for ReleaseServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<LockError> for ReleaseServiceError {
    fn from(value: LockError) -> Self {
        Self::Lock(value)
    }
}

/// Get-or-create service over a release repository and a lock backend.
pub struct ReleaseService<'a, R: ReleaseRepository> {
    repo: R,
    locks: &'a dyn LockService,
    lock_duration: Duration,
    retry_policy: RetryPolicy,
}

impl<'a, R: ReleaseRepository> ReleaseService<'a, R> {
    /// Creates a service using the provided repository and lock backend.
    pub fn new(
        repo: R,
        locks: &'a dyn LockService,
        lock_duration: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            locks,
            lock_duration,
            retry_policy,
        }
    }

    /// Returns the release for `fields.(tenant_id, version)`, creating it
    /// from `fields` when absent.
    ///
    /// The flag is `true` only for the caller whose insert wrote the row.
    /// Fields of an existing release are never updated.
    ///
    /// # Errors
    /// - `Validation` for invalid `fields`.
    /// - `Lock(LockError::Timeout)` when the creation lock stayed busy.
    /// - `DuplicateRelease` when the insert conflicts under the lock.
    pub fn get_or_create(
        &self,
        fields: &NewRelease,
    ) -> Result<(Release, bool), ReleaseServiceError> {
        fields.validate().map_err(ReleaseServiceError::Validation)?;

        if let Some(existing) = self.repo.find_release(fields.tenant_id, &fields.version)? {
            return Ok((existing, false));
        }

        let lock = NamedLock::new(
            self.locks,
            release_lock_key(fields.tenant_id, &fields.version),
            self.lock_duration,
        );
        let guard = lock.acquire_with(&self.retry_policy)?;

        // A concurrent creator may have finished between the fast path and
        // the lock.
        if let Some(existing) = self.repo.find_release(fields.tenant_id, &fields.version)? {
            return Ok((existing, false));
        }

        let created = match self.repo.insert_release(fields)? {
            InsertOutcome::Inserted(release) => release,
            InsertOutcome::Conflict => {
                error!(
                    "event=release_create module=service status=error error_code=duplicate_release tenant_id={} lock_key={}",
                    fields.tenant_id,
                    guard.key()
                );
                return Err(ReleaseServiceError::DuplicateRelease {
                    tenant_id: fields.tenant_id,
                    version: fields.version.clone(),
                });
            }
        };
        drop(guard);

        info!(
            "event=release_create module=service status=ok tenant_id={} release_id={}",
            created.tenant_id, created.id
        );
        Ok((created, true))
    }
}
