//! Release/project linking.
//!
//! # Responsibility
//! - Link a release to a set of projects, one independent insert per project.
//! - Report which projects this call linked for the first time.
//!
//! # Invariants
//! - No lock is taken; the link primary key alone decides the winner.
//! - A project already linked (by anyone) is excluded from the result.
//! - Duplicate projects in the input are linked at most once per call.
//! - Links committed before a failure are still reported, through
//!   `LinkAllError::linked`.

use crate::model::project::{Project, ProjectId};
use crate::model::release::Release;
use crate::repo::release_project_repo::{LinkOutcome, ReleaseProjectRepository};
use crate::repo::{RepoError, RepoResult};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage failure part-way through `link_all`.
#[derive(Debug)]
pub struct LinkAllError {
    /// Projects linked and committed by this call before the failure.
    pub linked: Vec<Project>,
    pub source: RepoError,
}

impl Display for LinkAllError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "linking stopped after {} new links: {}",
            self.linked.len(),
            self.source
        )
    }
}

impl Error for LinkAllError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Links releases to projects with per-item conflict tolerance.
pub struct AssociationManager<R: ReleaseProjectRepository> {
    repo: R,
}

impl<R: ReleaseProjectRepository> AssociationManager<R> {
    /// Creates a manager using the provided link repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Links every project in `projects` to `release`.
    ///
    /// Returns the projects newly linked by this call, in input order.
    ///
    /// # Errors
    /// Stops at the first storage failure other than an existing link. The
    /// error carries the projects linked before it; those links stay
    /// committed.
    pub fn link_all(
        &self,
        release: &Release,
        projects: &[Project],
    ) -> Result<Vec<Project>, LinkAllError> {
        let mut seen: HashSet<ProjectId> = HashSet::with_capacity(projects.len());
        let mut newly_linked = Vec::new();

        for project in projects {
            if !seen.insert(project.id) {
                continue;
            }

            match self.repo.link_project(release.id, project.id) {
                Ok(LinkOutcome::Linked) => newly_linked.push(project.clone()),
                Ok(LinkOutcome::AlreadyLinked) => debug!(
                    "event=release_link module=service status=skipped reason=already_linked release_id={} project_id={}",
                    release.id, project.id
                ),
                Err(err) => {
                    warn!(
                        "event=release_link module=service status=error release_id={} project_id={} linked={} error={err}",
                        release.id,
                        project.id,
                        newly_linked.len()
                    );
                    return Err(LinkAllError {
                        linked: newly_linked,
                        source: err,
                    });
                }
            }
        }

        info!(
            "event=release_link module=service status=ok release_id={} requested={} linked={}",
            release.id,
            seen.len(),
            newly_linked.len()
        );
        Ok(newly_linked)
    }

    /// Lists projects currently linked to `release`.
    pub fn linked_projects(&self, release: &Release) -> RepoResult<Vec<Project>> {
        self.repo.list_linked_projects(release.id)
    }
}
