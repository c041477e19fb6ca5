//! Lock backend stored in the `named_locks` table.
//!
//! # Invariants
//! - Acquire and takeover of an expired lease happen in one immediate
//!   transaction, so two processes never both observe success.
//! - Expiry uses wall-clock epoch milliseconds shared by every process.
//! - A database left busy by another writer past `busy_timeout` reads as a
//!   held lock.

use super::{LockError, LockLease, LockResult, LockService};
use crate::db::{now_epoch_ms, open_db};
use crate::repo::ensure_table_ready;
use log::{debug, info, warn};
use rusqlite::{params, Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Cross-process lock service sharing the release database file.
///
/// Owns a dedicated connection so lock traffic never interleaves with the
/// caller's own transactions.
pub struct SqliteLockService {
    conn: Mutex<Connection>,
}

impl SqliteLockService {
    /// Opens (and migrates) the database at `path` for lock traffic.
    ///
    /// Leases abandoned by crashed processes are purged on open.
    pub fn open(path: impl AsRef<Path>) -> LockResult<Self> {
        let conn = open_db(path).map_err(|err| LockError::Backend(err.into()))?;
        let service = Self::from_connection(conn)?;
        if let Err(err) = service.purge_expired() {
            warn!("event=lock_purge module=lock status=error error={err}");
        }
        Ok(service)
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> LockResult<Self> {
        ensure_table_ready(&conn, "named_locks", &["lock_key", "token", "expires_at"])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Deletes every expired lease and returns how many were removed.
    pub fn purge_expired(&self) -> LockResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM named_locks WHERE expires_at <= ?1;",
            [now_epoch_ms()],
        )?;
        if removed > 0 {
            info!("event=lock_purge module=lock status=ok removed={removed}");
        }
        Ok(removed)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Takes over an expired row for `key` and inserts `lease` unless the key is
/// still held. Returns the number of inserted rows.
fn insert_lease(
    conn: &mut Connection,
    lease: &LockLease,
    duration_ms: i64,
) -> rusqlite::Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let now = now_epoch_ms();
    tx.execute(
        "DELETE FROM named_locks WHERE lock_key = ?1 AND expires_at <= ?2;",
        params![lease.key(), now],
    )?;

    let changed = tx.execute(
        "INSERT INTO named_locks (lock_key, token, expires_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (lock_key) DO NOTHING;",
        params![
            lease.key(),
            lease.token().to_string(),
            now.saturating_add(duration_ms)
        ],
    )?;
    tx.commit()?;
    Ok(changed)
}

impl LockService for SqliteLockService {
    fn try_acquire(&self, key: &str, duration: Duration) -> LockResult<LockLease> {
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let lease = LockLease::new(key);
        let changed = match insert_lease(&mut self.conn(), &lease, duration_ms) {
            Ok(changed) => changed,
            Err(err) if is_busy(&err) => {
                debug!("event=lock_acquire module=lock status=busy key={key} error={err}");
                0
            }
            Err(err) => return Err(err.into()),
        };

        if changed == 0 {
            return Err(LockError::Unavailable {
                key: key.to_string(),
            });
        }
        Ok(lease)
    }

    fn release(&self, lease: &LockLease) -> LockResult<()> {
        self.conn().execute(
            "DELETE FROM named_locks WHERE lock_key = ?1 AND token = ?2;",
            params![lease.key(), lease.token().to_string()],
        )?;
        Ok(())
    }
}
