//! Ordered, reversible schema migrations for the StudyGroups SQLite
//! database.
//!
//! Migrations are declarative: each one lists the [`SchemaChange`]s of its
//! `up` and `down` directions. The [`Runner`] validates them against an
//! in-memory [`SchemaModel`], renders SQLite DDL and applies every migration
//! in its own transaction, keeping the applied-migrations record in
//! `schema_migrations`.
//!
//! ```rust,ignore
//! let mut conn = studygroups_db::connection::open(path, timeout)?;
//! let runner = studygroups_db::Runner::new(studygroups_db::catalog::migrations()?)?;
//! runner.up(&mut conn, None)?;
//! ```

pub mod catalog;
pub mod connection;
pub mod error;
pub mod lock;
pub mod migration;
pub mod planner;
pub mod progress;
pub mod record;
pub mod runner;
pub mod schema;
pub mod source;
pub mod sql;

pub use error::{MigrateError, Result, SchemaError, StepError};
pub use lock::LockInfo;
pub use migration::{Direction, Migration, MigrationId};
pub use planner::SchemaModel;
pub use progress::{Progress, ProgressSink, RecordingSink, TracingSink};
pub use record::AppliedMigration;
pub use runner::{MigrationState, MigrationStatus, PlannedStep, RunReport, Runner, StatusReport};
pub use schema::{Column, ColumnType, CreateTable, DefaultValue, ForeignKey, Index, OnDelete, SchemaChange};
