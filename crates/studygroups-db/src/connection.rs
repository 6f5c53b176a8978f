use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use studygroups_common::{Error, Result};
use tracing::info;

/// Open the target database with foreign keys enforced.
pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    configure(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_keys_enabled(conn: &Connection) -> bool {
        conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .unwrap()
            == 1
    }

    #[test]
    fn in_memory_enforces_foreign_keys() {
        let conn = open_in_memory().unwrap();
        assert!(foreign_keys_enabled(&conn));
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open(&dir.path().join("test.db"), Duration::from_millis(100)).unwrap();
        assert!(foreign_keys_enabled(&conn));

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn unopenable_path_is_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(&dir.path().join("missing/dir/test.db"), Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}
