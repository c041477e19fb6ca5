//! Create-or-get release use case.
//!
//! # Responsibility
//! - Validate a creation request and resolve its project slugs.
//! - Get or create the release, link the requested projects, then notify
//!   for links made by this call when the release is live.
//!
//! # Invariants
//! - Unknown project slugs reject the request before any lock or write.
//! - `CreateOutcome::Created` is reported to exactly one caller per
//!   `(tenant_id, version)`.
//! - Fields of an existing release are never updated; only new links and
//!   their notifications are added.
//! - Every link this call commits is dispatched, even when a later link
//!   fails and the call returns an error.

use crate::config::LockConfig;
use crate::lock::{LockError, LockService};
use crate::model::project::{Project, TenantId};
use crate::model::release::{NewRelease, Release, ReleaseValidationError};
use crate::repo::activity_repo::SqliteActivityRepository;
use crate::repo::project_repo::{ProjectRepository, SqliteProjectRepository};
use crate::repo::release_project_repo::SqliteReleaseProjectRepository;
use crate::repo::release_repo::SqliteReleaseRepository;
use crate::repo::{RepoError, RepoResult};
use crate::service::association_manager::AssociationManager;
use crate::service::notification_dispatcher::{
    DispatchReport, NotificationDispatcher, ReleaseNotifier,
};
use crate::service::release_service::{ReleaseService, ReleaseServiceError};
use log::{info, warn};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-supplied release fields plus the project slugs to link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateReleaseRequest {
    pub version: String,
    pub ref_name: Option<String>,
    pub url: Option<String>,
    pub owner_id: Option<i64>,
    pub date_started: Option<i64>,
    pub date_released: Option<i64>,
    pub projects: Vec<String>,
}

impl CreateReleaseRequest {
    pub fn new<S: Into<String>>(
        version: impl Into<String>,
        projects: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            version: version.into(),
            projects: projects.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn released_at(mut self, date_released: i64) -> Self {
        self.date_released = Some(date_released);
        self
    }

    fn to_new_release(&self, tenant_id: TenantId) -> NewRelease {
        NewRelease {
            tenant_id,
            version: self.version.clone(),
            ref_name: self.ref_name.clone(),
            url: self.url.clone(),
            owner_id: self.owner_id,
            date_started: self.date_started,
            date_released: self.date_released,
        }
    }
}

/// Which of the two success paths a call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExisted,
}

impl CreateOutcome {
    /// HTTP-style status: `201 Created` or `208 Already Reported`.
    pub fn status_code(self) -> u16 {
        match self {
            Self::Created => 201,
            Self::AlreadyExisted => 208,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExisted => "already_existed",
        }
    }
}

/// Successful result of `create_or_get_release`.
#[derive(Debug)]
pub struct ReleaseCreation {
    pub outcome: CreateOutcome,
    pub release: Release,
    /// Projects linked by this call, in request order.
    pub newly_linked: Vec<Project>,
    pub dispatch: DispatchReport,
}

impl ReleaseCreation {
    pub fn created(&self) -> bool {
        self.outcome == CreateOutcome::Created
    }
}

/// Failures of the create-or-get use case.
#[derive(Debug)]
pub enum CreateReleaseError {
    Validation(ReleaseValidationError),
    /// Requested slugs that name no project of the tenant, sorted.
    InvalidProjects(Vec<String>),
    LockTimeout { key: String, attempts: u32 },
    DuplicateRelease { tenant_id: TenantId, version: String },
    Repo(RepoError),
}

impl CreateReleaseError {
    /// Returns whether the caller can act on the error (bad input or
    /// contention) rather than it being an internal failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidProjects(_) | Self::LockTimeout { .. }
        )
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::InvalidProjects(_) => "invalid_projects",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::DuplicateRelease { .. } => "duplicate_release",
            Self::Repo(_) => "storage_failed",
        }
    }
}

impl Display for CreateReleaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidProjects(slugs) => {
                write!(f, "invalid project slugs: {}", slugs.join(", "))
            }
            Self::LockTimeout { key, attempts } => write!(
                f,
                "release is being created by another caller; lock `{key}` stayed busy after {attempts} attempts"
            ),
            Self::DuplicateRelease { tenant_id, version } => write!(
                f,
                "release `{version}` for tenant {tenant_id} was created twice under its lock"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CreateReleaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::InvalidProjects(_)
            | Self::LockTimeout { .. }
            | Self::DuplicateRelease { .. } => None,
        }
    }
}

impl From<RepoError> for CreateReleaseError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ReleaseServiceError> for CreateReleaseError {
    fn from(value: ReleaseServiceError) -> Self {
        match value {
            ReleaseServiceError::Validation(err) => Self::Validation(err),
            ReleaseServiceError::Lock(LockError::Timeout { key, attempts }) => {
                Self::LockTimeout { key, attempts }
            }
            ReleaseServiceError::Lock(LockError::Unavailable { key }) => {
                Self::LockTimeout { key, attempts: 1 }
            }
            ReleaseServiceError::Lock(LockError::Backend(err)) => Self::Repo(err),
            ReleaseServiceError::DuplicateRelease { tenant_id, version } => {
                Self::DuplicateRelease { tenant_id, version }
            }
            ReleaseServiceError::Repo(err) => Self::Repo(err),
        }
    }
}

/// Create-or-get orchestration over one SQLite connection.
pub struct ReleaseCreationService<'a, N: ReleaseNotifier> {
    projects: SqliteProjectRepository<'a>,
    releases: ReleaseService<'a, SqliteReleaseRepository<'a>>,
    associations: AssociationManager<SqliteReleaseProjectRepository<'a>>,
    dispatcher: NotificationDispatcher<SqliteActivityRepository<'a>, N>,
}

impl<'a, N: ReleaseNotifier> ReleaseCreationService<'a, N> {
    /// Builds the service from a migrated connection and a lock backend.
    ///
    /// # Errors
    /// Returns schema errors when `conn` is not migrated.
    pub fn try_new(
        conn: &'a Connection,
        locks: &'a dyn LockService,
        notifier: N,
        lock_config: &LockConfig,
    ) -> RepoResult<Self> {
        Ok(Self {
            projects: SqliteProjectRepository::try_new(conn)?,
            releases: ReleaseService::new(
                SqliteReleaseRepository::try_new(conn)?,
                locks,
                lock_config.duration(),
                lock_config.retry_policy(),
            ),
            associations: AssociationManager::new(SqliteReleaseProjectRepository::try_new(
                conn,
            )?),
            dispatcher: NotificationDispatcher::new(
                SqliteActivityRepository::try_new(conn)?,
                notifier,
            ),
        })
    }

    /// Returns the release `request.version` of `tenant_id`, creating it if
    /// needed, and links the requested projects.
    ///
    /// # Errors
    /// - `Validation` / `InvalidProjects` for bad input; nothing is written.
    /// - `LockTimeout` when a concurrent creator held the lock too long.
    /// - `DuplicateRelease` on a storage consistency failure.
    /// - `Repo` for other storage failures.
    pub fn create_or_get_release(
        &self,
        tenant_id: TenantId,
        request: &CreateReleaseRequest,
    ) -> Result<ReleaseCreation, CreateReleaseError> {
        let result = self.run(tenant_id, request);
        if let Err(err) = &result {
            warn!(
                "event=release_create_or_get module=service status=error error_code={} tenant_id={tenant_id} error={err}",
                err.error_code()
            );
        }
        result
    }

    fn run(
        &self,
        tenant_id: TenantId,
        request: &CreateReleaseRequest,
    ) -> Result<ReleaseCreation, CreateReleaseError> {
        let fields = request.to_new_release(tenant_id);
        fields.validate().map_err(CreateReleaseError::Validation)?;

        let projects = self.resolve_projects(tenant_id, &request.projects)?;

        let (release, created) = self.releases.get_or_create(&fields)?;
        let outcome = if created {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExisted
        };

        let newly_linked = match self.associations.link_all(&release, &projects) {
            Ok(linked) => linked,
            Err(err) => {
                // Committed links are never reported as new again.
                let dispatch = self.dispatcher.notify_if_live(&release, &err.linked);
                warn!(
                    "event=release_create_or_get module=service status=partial release_id={} newly_linked={} notified={}",
                    release.id,
                    err.linked.len(),
                    dispatch.notified.len()
                );
                return Err(CreateReleaseError::Repo(err.source));
            }
        };
        let dispatch = self.dispatcher.notify_if_live(&release, &newly_linked);

        info!(
            "event=release_create_or_get module=service status=ok outcome={} tenant_id={} release_id={} newly_linked={} notified={} dispatch_failures={}",
            outcome.as_str(),
            tenant_id,
            release.id,
            newly_linked.len(),
            dispatch.notified.len(),
            dispatch.failures.len()
        );

        Ok(ReleaseCreation {
            outcome,
            release,
            newly_linked,
            dispatch,
        })
    }

    /// Resolves `slugs` to projects in request order, without duplicates.
    fn resolve_projects(
        &self,
        tenant_id: TenantId,
        slugs: &[String],
    ) -> Result<Vec<Project>, CreateReleaseError> {
        let found = self.projects.find_by_slugs(tenant_id, slugs)?;

        let invalid: BTreeSet<&str> = slugs
            .iter()
            .map(String::as_str)
            .filter(|slug| !found.iter().any(|project| project.slug == *slug))
            .collect();
        if !invalid.is_empty() {
            return Err(CreateReleaseError::InvalidProjects(
                invalid.into_iter().map(str::to_string).collect(),
            ));
        }

        let mut seen = HashSet::with_capacity(slugs.len());
        Ok(slugs
            .iter()
            .filter(|slug| seen.insert(slug.as_str()))
            .filter_map(|slug| found.iter().find(|project| project.slug == *slug).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{CreateOutcome, CreateReleaseError, CreateReleaseRequest, ReleaseCreationService};
    use crate::config::LockConfig;
    use crate::db::open_db_in_memory;
    use crate::lock::{release_lock_key, InMemoryLockService, LockService};
    use crate::model::activity::Activity;
    use crate::model::project::{Project, ProjectId};
    use crate::model::release::Release;
    use crate::repo::project_repo::{ProjectRepository, SqliteProjectRepository};
    use crate::service::notification_dispatcher::{NotifyError, ReleaseNotifier};
    use rusqlite::Connection;
    use std::cell::RefCell;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<ProjectId>>,
    }

    impl ReleaseNotifier for RecordingNotifier {
        fn send_release_notification(
            &self,
            _release: &Release,
            project: &Project,
            _activity: &Activity,
        ) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push(project.id);
            Ok(())
        }
    }

    fn fast_lock_config() -> LockConfig {
        LockConfig {
            duration_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 1,
        }
    }

    fn seed_projects(conn: &Connection) {
        let repo = SqliteProjectRepository::try_new(conn).unwrap();
        repo.create_project(1, "web", "Web").unwrap();
        repo.create_project(1, "api", "API").unwrap();
        repo.create_project(2, "other", "Other tenant").unwrap();
    }

    fn release_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM releases;", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn first_call_creates_and_second_reports_existing() {
        let conn = open_db_in_memory().unwrap();
        seed_projects(&conn);
        let locks = InMemoryLockService::new();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        let request = CreateReleaseRequest::new("1.0", ["web"]);
        let first = service.create_or_get_release(1, &request).unwrap();
        assert_eq!(first.outcome, CreateOutcome::Created);
        assert_eq!(first.outcome.status_code(), 201);
        assert_eq!(first.newly_linked.len(), 1);

        let second = service.create_or_get_release(1, &request).unwrap();
        assert_eq!(second.outcome, CreateOutcome::AlreadyExisted);
        assert_eq!(second.outcome.status_code(), 208);
        assert_eq!(second.release.id, first.release.id);
        assert!(second.newly_linked.is_empty());
        assert_eq!(release_count(&conn), 1);
    }

    #[test]
    fn existing_release_gains_new_links_and_notifies_once() {
        let conn = open_db_in_memory().unwrap();
        seed_projects(&conn);
        let locks = InMemoryLockService::new();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        service
            .create_or_get_release(1, &CreateReleaseRequest::new("1.0", ["web"]).released_at(7))
            .unwrap();
        let second = service
            .create_or_get_release(
                1,
                &CreateReleaseRequest::new("1.0", ["web", "api"]).released_at(7),
            )
            .unwrap();

        assert_eq!(second.outcome, CreateOutcome::AlreadyExisted);
        let slugs: Vec<&str> = second.newly_linked.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["api"]);
        assert_eq!(notifier.sent.borrow().len(), 2);
    }

    #[test]
    fn unknown_or_foreign_slugs_are_rejected_before_writing() {
        let conn = open_db_in_memory().unwrap();
        seed_projects(&conn);
        let locks = InMemoryLockService::new();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        let err = service
            .create_or_get_release(1, &CreateReleaseRequest::new("1.0", ["web", "other", "nope"]))
            .unwrap_err();
        match err {
            CreateReleaseError::InvalidProjects(slugs) => {
                assert_eq!(slugs, vec!["nope".to_string(), "other".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(release_count(&conn), 0);
    }

    #[test]
    fn held_lock_surfaces_user_facing_timeout() {
        let conn = open_db_in_memory().unwrap();
        seed_projects(&conn);
        let locks = InMemoryLockService::new();
        let _held = locks
            .try_acquire(&release_lock_key(1, "1.0"), Duration::from_secs(60))
            .unwrap();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        let err = service
            .create_or_get_release(1, &CreateReleaseRequest::new("1.0", ["web"]))
            .unwrap_err();
        assert!(matches!(
            err,
            CreateReleaseError::LockTimeout { attempts: 3, .. }
        ));
        assert!(err.is_user_facing());
        assert_eq!(release_count(&conn), 0);
    }

    #[test]
    fn blank_version_is_validation_error() {
        let conn = open_db_in_memory().unwrap();
        let locks = InMemoryLockService::new();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        let err = service
            .create_or_get_release(1, &CreateReleaseRequest::new("  ", Vec::<String>::new()))
            .unwrap_err();
        assert!(matches!(err, CreateReleaseError::Validation(_)));
    }

    #[test]
    fn duplicate_slugs_in_request_link_once() {
        let conn = open_db_in_memory().unwrap();
        seed_projects(&conn);
        let locks = InMemoryLockService::new();
        let notifier = RecordingNotifier::default();
        let service =
            ReleaseCreationService::try_new(&conn, &locks, &notifier, &fast_lock_config())
                .unwrap();

        let created = service
            .create_or_get_release(
                1,
                &CreateReleaseRequest::new("2.0", ["api", "web", "api"]).released_at(1),
            )
            .unwrap();
        let slugs: Vec<&str> = created.newly_linked.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["api", "web"]);
        assert_eq!(notifier.sent.borrow().len(), 2);
    }
}
