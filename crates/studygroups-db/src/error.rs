use thiserror::Error;

use crate::migration::{Direction, MigrationId};

/// A schema change that cannot be applied to the current schema, detected
/// before any SQL runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid {kind} name: {name:?}")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("table {0} has no columns")]
    EmptyTable(String),

    #[error("table {table} declares column {column} twice")]
    DuplicateColumn { table: String, column: String },

    #[error("default of {table}.{column} does not fit its type")]
    DefaultMismatch { table: String, column: String },

    #[error("table {0} declares more than one primary key")]
    MultiplePrimaryKeys(String),

    #[error("index {0} has no columns")]
    EmptyIndex(String),

    #[error("index {0} already exists")]
    IndexExists(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("table {0} does not exist")]
    UnknownTable(String),

    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("table {table} is still referenced by a foreign key on {by}")]
    StillReferenced { table: String, by: String },

    #[error("table {0} references itself and cannot be rebuilt to change its foreign keys")]
    SelfReferenced(String),

    #[error("table {table} already has a foreign key on {column}")]
    ForeignKeyExists { table: String, column: String },

    #[error("table {table} has no foreign key on {column}")]
    UnknownForeignKey { table: String, column: String },
}

/// Why a single migration step failed.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("migration {id} failed ({direction}): {cause}")]
    MigrationFailed {
        id: MigrationId,
        direction: Direction,
        #[source]
        cause: StepError,
    },

    #[error("migration {id} is out of order: {applied} is already applied")]
    OutOfOrderMigration { id: MigrationId, applied: MigrationId },

    #[error("applied migration {0} has no matching definition")]
    UnknownMigration(MigrationId),

    #[error("migration {0} is not applied")]
    NotApplied(MigrationId),

    #[error("no migration with version {0}")]
    NoSuchVersion(u32),

    #[error(
        "applied migration {id} was modified after it was applied \
         (recorded checksum {recorded}, current {current})"
    )]
    ChecksumMismatch {
        id: MigrationId,
        recorded: String,
        current: String,
    },

    #[error("migration {0} does not restore the schema in its down steps")]
    Irreversible(MigrationId),

    #[error("migrations are locked by {holder} (pid {pid}) since {since}")]
    Locked {
        holder: String,
        pid: i64,
        since: String,
    },

    #[error("invalid migration definition {origin}: {reason}")]
    Definition { origin: String, reason: String },

    #[error("migration record error: {0}")]
    Record(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    pub(crate) fn failed(
        id: &MigrationId,
        direction: Direction,
        cause: impl Into<StepError>,
    ) -> Self {
        Self::MigrationFailed {
            id: id.clone(),
            direction,
            cause: cause.into(),
        }
    }

    pub(crate) fn definition(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::Definition {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}
