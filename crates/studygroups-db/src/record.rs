//! The applied-migrations record: one row per applied migration in
//! `schema_migrations`.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};

use crate::migration::{Migration, MigrationId};

pub const RECORD_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub id: MigrationId,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

pub fn ensure_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Applied migrations in ascending version order. A database that has never
/// been migrated has no record table and yields an empty list.
pub fn load(conn: &Connection) -> rusqlite::Result<Vec<AppliedMigration>> {
    if !table_exists(conn, RECORD_TABLE)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT version, name, checksum, applied_at
         FROM schema_migrations
         ORDER BY version ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        let version: i64 = row.get(0)?;
        let version = u32::try_from(version)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))?;
        let applied_at: String = row.get(3)?;
        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        Ok(AppliedMigration {
            id: MigrationId::new(version, row.get::<_, String>(1)?),
            checksum: row.get(2)?,
            applied_at,
        })
    })?;

    rows.collect()
}

/// Record `migration` as applied. Meant to run inside the migration's own
/// transaction.
pub fn insert(conn: &Connection, migration: &Migration, at: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, checksum, applied_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            migration.version(),
            migration.id().name,
            migration.checksum(),
            at.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    let removed = conn.execute(
        "DELETE FROM schema_migrations WHERE version = ?1",
        params![version],
    )?;
    if removed == 0 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, CreateTable, SchemaChange};

    fn migration(version: u32, name: &str) -> Migration {
        let table = format!("t{version}");
        Migration::new(
            MigrationId::new(version, name),
            vec![SchemaChange::CreateTable(
                CreateTable::new(&table).column(Column::new("id", ColumnType::Integer).primary_key()),
            )],
            vec![SchemaChange::DropTable { table }],
        )
        .unwrap()
    }

    #[test]
    fn missing_table_loads_empty() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(load(&conn).unwrap().is_empty());
        assert!(!table_exists(&conn, RECORD_TABLE).unwrap());
    }

    #[test]
    fn insert_load_remove() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn).unwrap();
        ensure_table(&conn).unwrap();

        let second = migration(2, "second");
        let first = migration(1, "first");
        let at = Utc::now();
        insert(&conn, &second, at).unwrap();
        insert(&conn, &first, at).unwrap();

        let applied = load(&conn).unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].id, MigrationId::new(1, "first"));
        assert_eq!(applied[0].checksum, first.checksum());
        assert_eq!(applied[1].id, MigrationId::new(2, "second"));
        assert_eq!(applied[1].applied_at.timestamp(), at.timestamp());

        remove(&conn, 2).unwrap();
        let applied = load(&conn).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id.version, 1);
    }

    #[test]
    fn duplicate_insert_fails() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn).unwrap();
        let m = migration(1, "first");
        insert(&conn, &m, Utc::now()).unwrap();
        assert!(insert(&conn, &m, Utc::now()).is_err());
    }

    #[test]
    fn removing_unrecorded_version_fails() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn).unwrap();
        assert!(matches!(
            remove(&conn, 7),
            Err(rusqlite::Error::QueryReturnedNoRows)
        ));
    }
}
