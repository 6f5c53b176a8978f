use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MigrateError, Result};

pub const LOCK_TABLE: &str = "schema_migrations_lock";

/// Current holder of the migration lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub holder: String,
    pub pid: i64,
    pub acquired_at: String,
}

/// Advisory lock serializing runner invocations against one database.
///
/// The lock is a single row in `schema_migrations_lock`. It is committed
/// before the applied-migrations record is read and removed once the run
/// ends, successful or not. A crashed runner leaves the row behind; `unlock`
/// clears it.
#[derive(Debug)]
pub struct MigrationLock {
    holder: String,
}

impl MigrationLock {
    pub fn acquire(conn: &Connection) -> Result<Self> {
        ensure_table(conn)?;

        let holder = Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO schema_migrations_lock (id, holder, pid, acquired_at)
             VALUES (1, ?1, ?2, ?3)",
            params![holder, std::process::id(), Utc::now().to_rfc3339()],
        )?;

        if inserted == 0 {
            let current = current(conn)?;
            return Err(match current {
                Some(info) => MigrateError::Locked {
                    holder: info.holder,
                    pid: info.pid,
                    since: info.acquired_at,
                },
                // Released between the insert and the read.
                None => MigrateError::Locked {
                    holder: "unknown".to_string(),
                    pid: 0,
                    since: "unknown".to_string(),
                },
            });
        }

        debug!(holder = %holder, "acquired migration lock");
        Ok(Self { holder })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn release(self, conn: &Connection) -> Result<()> {
        let removed = conn.execute(
            "DELETE FROM schema_migrations_lock WHERE id = 1 AND holder = ?1",
            params![self.holder],
        )?;
        if removed == 0 {
            warn!(holder = %self.holder, "migration lock was already released");
        } else {
            debug!(holder = %self.holder, "released migration lock");
        }
        Ok(())
    }
}

pub fn current(conn: &Connection) -> Result<Option<LockInfo>> {
    if !crate::record::table_exists(conn, LOCK_TABLE)? {
        return Ok(None);
    }

    let info = conn
        .query_row(
            "SELECT holder, pid, acquired_at FROM schema_migrations_lock WHERE id = 1",
            [],
            |row| {
                Ok(LockInfo {
                    holder: row.get(0)?,
                    pid: row.get(1)?,
                    acquired_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

/// Remove the lock regardless of holder. Returns the lock that was cleared.
pub fn force_release(conn: &Connection) -> Result<Option<LockInfo>> {
    let info = current(conn)?;
    if let Some(info) = &info {
        conn.execute("DELETE FROM schema_migrations_lock WHERE id = 1", [])?;
        warn!(
            holder = %info.holder,
            pid = info.pid,
            "force-released migration lock held since {}",
            info.acquired_at
        );
    }
    Ok(info)
}

fn ensure_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            pid INTEGER NOT NULL,
            acquired_at TEXT NOT NULL
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(current(&conn).unwrap().is_none());

        let lock = MigrationLock::acquire(&conn).unwrap();
        let info = current(&conn).unwrap().unwrap();
        assert_eq!(info.holder, lock.holder());
        assert_eq!(info.pid, i64::from(std::process::id()));

        lock.release(&conn).unwrap();
        assert!(current(&conn).unwrap().is_none());
    }

    #[test]
    fn second_acquire_reports_holder() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = MigrationLock::acquire(&conn).unwrap();

        let err = MigrationLock::acquire(&conn).unwrap_err();
        match err {
            MigrateError::Locked { holder, .. } => assert_eq!(holder, lock.holder()),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn force_release_clears_stale_lock() {
        let conn = Connection::open_in_memory().unwrap();
        let stale = MigrationLock::acquire(&conn).unwrap();

        let cleared = force_release(&conn).unwrap().unwrap();
        assert_eq!(cleared.holder, stale.holder());
        assert!(force_release(&conn).unwrap().is_none());

        let fresh = MigrationLock::acquire(&conn).unwrap();
        // The stale handle no longer owns the row.
        stale.release(&conn).unwrap();
        assert_eq!(current(&conn).unwrap().unwrap().holder, fresh.holder());
    }
}
