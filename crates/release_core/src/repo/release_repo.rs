//! Release repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Own the uniqueness-constrained `releases` storage.
//! - Report `(tenant_id, version)` conflicts as `InsertOutcome::Conflict`.
//!
//! # Invariants
//! - Write paths call `NewRelease::validate()` before SQL mutations.
//! - Inserts never overwrite an existing release.

use crate::db::now_epoch_ms;
use crate::model::project::TenantId;
use crate::model::release::{NewRelease, Release, ReleaseId};
use crate::repo::{ensure_table_ready, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RELEASE_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    version,
    ref_name,
    url,
    owner_id,
    date_started,
    date_released,
    date_added
FROM releases";

/// Result of a release insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written by this call.
    Inserted(Release),
    /// A release with the same `(tenant_id, version)` already exists.
    Conflict,
}

/// Repository interface for release storage.
pub trait ReleaseRepository {
    /// Point lookup by the unique `(tenant_id, version)` key.
    fn find_release(&self, tenant_id: TenantId, version: &str) -> RepoResult<Option<Release>>;
    /// Point lookup by row id.
    fn get_release(&self, id: ReleaseId) -> RepoResult<Option<Release>>;
    /// Inserts a release unless its `(tenant_id, version)` already exists.
    fn insert_release(&self, release: &NewRelease) -> RepoResult<InsertOutcome>;
}

/// SQLite-backed release repository.
pub struct SqliteReleaseRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReleaseRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table_ready(
            conn,
            "releases",
            &[
                "id",
                "tenant_id",
                "version",
                "ref_name",
                "url",
                "owner_id",
                "date_started",
                "date_released",
                "date_added",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl ReleaseRepository for SqliteReleaseRepository<'_> {
    fn find_release(&self, tenant_id: TenantId, version: &str) -> RepoResult<Option<Release>> {
        self.conn
            .query_row(
                &format!("{RELEASE_SELECT_SQL} WHERE tenant_id = ?1 AND version = ?2;"),
                params![tenant_id, version],
                parse_release_row,
            )
            .optional()
            .map_err(Into::into)
    }

    fn get_release(&self, id: ReleaseId) -> RepoResult<Option<Release>> {
        self.conn
            .query_row(
                &format!("{RELEASE_SELECT_SQL} WHERE id = ?1;"),
                [id],
                parse_release_row,
            )
            .optional()
            .map_err(Into::into)
    }

    fn insert_release(&self, release: &NewRelease) -> RepoResult<InsertOutcome> {
        release.validate()?;

        let date_added = now_epoch_ms();
        let changed = self.conn.execute(
            "INSERT INTO releases (
                tenant_id,
                version,
                ref_name,
                url,
                owner_id,
                date_started,
                date_released,
                date_added
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (tenant_id, version) DO NOTHING;",
            params![
                release.tenant_id,
                release.version.as_str(),
                release.ref_name.as_deref(),
                release.url.as_deref(),
                release.owner_id,
                release.date_started,
                release.date_released,
                date_added,
            ],
        )?;

        if changed == 0 {
            return Ok(InsertOutcome::Conflict);
        }

        Ok(InsertOutcome::Inserted(Release {
            id: self.conn.last_insert_rowid(),
            tenant_id: release.tenant_id,
            version: release.version.clone(),
            ref_name: release.ref_name.clone(),
            url: release.url.clone(),
            owner_id: release.owner_id,
            date_started: release.date_started,
            date_released: release.date_released,
            date_added,
        }))
    }
}

fn parse_release_row(row: &Row<'_>) -> rusqlite::Result<Release> {
    Ok(Release {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        version: row.get("version")?,
        ref_name: row.get("ref_name")?,
        url: row.get("url")?,
        owner_id: row.get("owner_id")?,
        date_started: row.get("date_started")?,
        date_released: row.get("date_released")?,
        date_added: row.get("date_added")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{InsertOutcome, ReleaseRepository, SqliteReleaseRepository};
    use crate::db::open_db_in_memory;
    use crate::model::release::NewRelease;
    use crate::repo::RepoError;

    #[test]
    fn insert_then_find_returns_same_release() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReleaseRepository::try_new(&conn).unwrap();

        let mut new_release = NewRelease::new(7, "1.0.0");
        new_release.ref_name = Some("v1.0.0".to_string());
        let InsertOutcome::Inserted(inserted) = repo.insert_release(&new_release).unwrap() else {
            panic!("first insert must succeed");
        };

        let found = repo.find_release(7, "1.0.0").unwrap().unwrap();
        assert_eq!(found, inserted);
        assert_eq!(repo.get_release(inserted.id).unwrap(), Some(inserted));
    }

    #[test]
    fn second_insert_for_same_key_is_conflict() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReleaseRepository::try_new(&conn).unwrap();

        repo.insert_release(&NewRelease::new(1, "2.0")).unwrap();
        let mut second = NewRelease::new(1, "2.0");
        second.url = Some("https://example.com/2.0".to_string());

        assert_eq!(repo.insert_release(&second).unwrap(), InsertOutcome::Conflict);
        let stored = repo.find_release(1, "2.0").unwrap().unwrap();
        assert_eq!(stored.url, None);
    }

    #[test]
    fn same_version_in_other_tenant_is_independent() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReleaseRepository::try_new(&conn).unwrap();

        repo.insert_release(&NewRelease::new(1, "3.0")).unwrap();
        let outcome = repo.insert_release(&NewRelease::new(2, "3.0")).unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted(_)));
        assert!(repo.find_release(3, "3.0").unwrap().is_none());
    }

    #[test]
    fn insert_rejects_invalid_release() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReleaseRepository::try_new(&conn).unwrap();

        let err = repo.insert_release(&NewRelease::new(1, "")).unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }
}
