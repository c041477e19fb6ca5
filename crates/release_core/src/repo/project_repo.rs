//! Project repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Resolve caller-supplied project slugs into tenant-owned projects.
//! - Seed projects for tooling and tests; the release creation path itself
//!   only reads them.
//!
//! # Invariants
//! - Slug lookups never cross tenants.
//! - `(tenant_id, slug)` is unique.

use crate::db::now_epoch_ms;
use crate::model::project::{Project, ProjectId, TenantId};
use crate::repo::{ensure_table_ready, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

const PROJECT_SELECT_SQL: &str = "SELECT id, tenant_id, slug, name FROM projects";

/// Repository interface for project lookups.
pub trait ProjectRepository {
    /// Creates one project and returns it.
    fn create_project(&self, tenant_id: TenantId, slug: &str, name: &str) -> RepoResult<Project>;
    /// Gets one project by id.
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    /// Returns the tenant's projects whose slug is in `slugs`, ordered by slug.
    ///
    /// Unknown slugs are silently absent from the result.
    fn find_by_slugs(&self, tenant_id: TenantId, slugs: &[String]) -> RepoResult<Vec<Project>>;
}

/// SQLite-backed project repository.
pub struct SqliteProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProjectRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table_ready(conn, "projects", &["id", "tenant_id", "slug", "name"])?;
        Ok(Self { conn })
    }
}

impl ProjectRepository for SqliteProjectRepository<'_> {
    fn create_project(&self, tenant_id: TenantId, slug: &str, name: &str) -> RepoResult<Project> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(RepoError::InvalidData(
                "project slug must not be blank".to_string(),
            ));
        }

        self.conn.execute(
            "INSERT INTO projects (tenant_id, slug, name, date_added)
             VALUES (?1, ?2, ?3, ?4);",
            params![tenant_id, slug, name, now_epoch_ms()],
        )?;

        Ok(Project {
            id: self.conn.last_insert_rowid(),
            tenant_id,
            slug: slug.to_string(),
            name: name.to_string(),
        })
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        self.conn
            .query_row(
                &format!("{PROJECT_SELECT_SQL} WHERE id = ?1;"),
                [id],
                parse_project_row,
            )
            .optional()
            .map_err(Into::into)
    }

    fn find_by_slugs(&self, tenant_id: TenantId, slugs: &[String]) -> RepoResult<Vec<Project>> {
        let unique: BTreeSet<&str> = slugs.iter().map(String::as_str).collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; unique.len()].join(", ");
        let sql = format!(
            "{PROJECT_SELECT_SQL}
             WHERE tenant_id = ?
               AND slug IN ({placeholders})
             ORDER BY slug ASC;"
        );
        let mut bind_values = vec![Value::Integer(tenant_id)];
        bind_values.extend(unique.into_iter().map(|slug| Value::Text(slug.to_string())));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }

        Ok(projects)
    }
}

pub(crate) fn parse_project_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
    })
}
