//! Release/project link repository.
//!
//! # Responsibility
//! - Create `(release_id, project_id)` links one at a time.
//! - Report an existing link as `LinkOutcome::AlreadyLinked`.
//!
//! # Invariants
//! - Each link attempt runs in its own immediate transaction; a failure on
//!   one link never rolls back another.
//! - Only the primary-key conflict is absorbed. Foreign-key and other
//!   failures propagate.

use crate::model::project::{Project, ProjectId};
use crate::model::release::ReleaseId;
use crate::repo::project_repo::parse_project_row;
use crate::repo::{ensure_table_ready, RepoResult};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

/// Result of a single link attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// This call created the link.
    Linked,
    /// The link existed before this call.
    AlreadyLinked,
}

/// Repository interface for release/project links.
pub trait ReleaseProjectRepository {
    /// Links one project to one release inside its own transaction.
    fn link_project(&self, release_id: ReleaseId, project_id: ProjectId)
        -> RepoResult<LinkOutcome>;
    /// Lists projects linked to a release, ordered by slug.
    fn list_linked_projects(&self, release_id: ReleaseId) -> RepoResult<Vec<Project>>;
}

/// SQLite-backed release/project link repository.
pub struct SqliteReleaseProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReleaseProjectRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table_ready(conn, "release_projects", &["release_id", "project_id"])?;
        Ok(Self { conn })
    }
}

impl ReleaseProjectRepository for SqliteReleaseProjectRepository<'_> {
    fn link_project(
        &self,
        release_id: ReleaseId,
        project_id: ProjectId,
    ) -> RepoResult<LinkOutcome> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "INSERT INTO release_projects (release_id, project_id)
             VALUES (?1, ?2)
             ON CONFLICT (release_id, project_id) DO NOTHING;",
            params![release_id, project_id],
        )?;
        tx.commit()?;

        if changed == 0 {
            Ok(LinkOutcome::AlreadyLinked)
        } else {
            Ok(LinkOutcome::Linked)
        }
    }

    fn list_linked_projects(&self, release_id: ReleaseId) -> RepoResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.tenant_id, p.slug, p.name
             FROM release_projects rp
             INNER JOIN projects p ON p.id = rp.project_id
             WHERE rp.release_id = ?1
             ORDER BY p.slug ASC;",
        )?;
        let mut rows = stmt.query([release_id])?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkOutcome, ReleaseProjectRepository, SqliteReleaseProjectRepository};
    use crate::db::open_db_in_memory;
    use crate::model::release::NewRelease;
    use crate::repo::project_repo::{ProjectRepository, SqliteProjectRepository};
    use crate::repo::release_repo::{InsertOutcome, ReleaseRepository, SqliteReleaseRepository};

    #[test]
    fn second_link_reports_already_linked() {
        let conn = open_db_in_memory().unwrap();
        let project = SqliteProjectRepository::try_new(&conn)
            .unwrap()
            .create_project(1, "api", "API")
            .unwrap();
        let InsertOutcome::Inserted(release) = SqliteReleaseRepository::try_new(&conn)
            .unwrap()
            .insert_release(&NewRelease::new(1, "1.0"))
            .unwrap()
        else {
            panic!("insert must succeed");
        };
        let repo = SqliteReleaseProjectRepository::try_new(&conn).unwrap();

        assert_eq!(
            repo.link_project(release.id, project.id).unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            repo.link_project(release.id, project.id).unwrap(),
            LinkOutcome::AlreadyLinked
        );
        assert_eq!(repo.list_linked_projects(release.id).unwrap(), vec![project]);
    }

    #[test]
    fn link_to_missing_project_propagates_error() {
        let conn = open_db_in_memory().unwrap();
        let InsertOutcome::Inserted(release) = SqliteReleaseRepository::try_new(&conn)
            .unwrap()
            .insert_release(&NewRelease::new(1, "1.0"))
            .unwrap()
        else {
            panic!("insert must succeed");
        };
        let repo = SqliteReleaseProjectRepository::try_new(&conn).unwrap();

        assert!(repo.link_project(release.id, 404).is_err());
        assert!(repo.list_linked_projects(release.id).unwrap().is_empty());
    }
}
