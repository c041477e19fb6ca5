//! Activity repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Activities are append-only; there is no update or delete API.
//! - `data` is stored as a JSON object and must parse back on read.

use crate::model::activity::{Activity, ActivityKind, NewActivity};
use crate::model::release::ReleaseId;
use crate::repo::{ensure_table_ready, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

/// Repository interface for activity records.
pub trait ActivityRepository {
    /// Appends one activity and returns it with its assigned id.
    fn insert_activity(&self, activity: &NewActivity) -> RepoResult<Activity>;
    /// Lists activities of a release ordered by insertion.
    fn list_release_activities(&self, release_id: ReleaseId) -> RepoResult<Vec<Activity>>;
}

/// SQLite-backed activity repository.
pub struct SqliteActivityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_table_ready(
            conn,
            "activities",
            &[
                "id",
                "kind",
                "project_id",
                "release_id",
                "ident",
                "data",
                "datetime",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl ActivityRepository for SqliteActivityRepository<'_> {
    fn insert_activity(&self, activity: &NewActivity) -> RepoResult<Activity> {
        let data = serde_json::to_string(&activity.data).map_err(|err| {
            RepoError::InvalidData(format!("activity data cannot be serialized: {err}"))
        })?;

        self.conn.execute(
            "INSERT INTO activities (kind, project_id, release_id, ident, data, datetime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                activity.kind.as_db(),
                activity.project_id,
                activity.release_id,
                activity.ident.as_str(),
                data,
                activity.datetime,
            ],
        )?;

        Ok(Activity {
            id: self.conn.last_insert_rowid(),
            kind: activity.kind,
            project_id: activity.project_id,
            release_id: activity.release_id,
            ident: activity.ident.clone(),
            data: activity.data.clone(),
            datetime: activity.datetime,
        })
    }

    fn list_release_activities(&self, release_id: ReleaseId) -> RepoResult<Vec<Activity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, project_id, release_id, ident, data, datetime
             FROM activities
             WHERE release_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([release_id])?;
        let mut activities = Vec::new();
        while let Some(row) = rows.next()? {
            activities.push(parse_activity_row(row)?);
        }
        Ok(activities)
    }
}

fn parse_activity_row(row: &Row<'_>) -> RepoResult<Activity> {
    let kind_text: String = row.get("kind")?;
    let kind = ActivityKind::from_db(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid activity kind `{kind_text}` in activities.kind"
        ))
    })?;

    let data_text: String = row.get("data")?;
    let data = serde_json::from_str(&data_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid activity data in activities.data: {err}"))
    })?;

    Ok(Activity {
        id: row.get("id")?,
        kind,
        project_id: row.get("project_id")?,
        release_id: row.get("release_id")?,
        ident: row.get("ident")?,
        data,
        datetime: row.get("datetime")?,
    })
}
