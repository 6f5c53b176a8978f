use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::lock::{self, LockInfo, MigrationLock};
use crate::migration::{Direction, Migration, MigrationId};
use crate::planner::SchemaModel;
use crate::progress::{Progress, ProgressSink, TracingSink};
use crate::record::{self, AppliedMigration};
use crate::sql;

/// Outcome of an `up`, `down` or `revert` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    /// Steps that ran, in execution order.
    pub completed: Vec<MigrationId>,
    /// How many migrations were applied before the run started.
    pub previously_applied: usize,
}

impl RunReport {
    fn new(direction: Direction, previously_applied: usize) -> Self {
        Self {
            direction,
            completed: Vec::new(),
            previously_applied,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.completed.is_empty()
    }
}

/// A step as it would execute, for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub id: MigrationId,
    pub direction: Direction,
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applied { applied_at: DateTime<Utc> },
    /// Applied, but the definition changed since.
    Modified { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub id: MigrationId,
    pub state: MigrationState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatus>,
    /// Recorded migrations with no matching definition.
    pub orphaned: Vec<AppliedMigration>,
    pub lock: Option<LockInfo>,
}

/// Applies and reverts an ordered list of migrations against a SQLite
/// connection, one transaction per migration.
pub struct Runner {
    migrations: Vec<Migration>,
    sink: Box<dyn ProgressSink>,
}

impl Runner {
    /// Migrations are sorted by version; two migrations sharing a version
    /// are rejected.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self> {
        migrations.sort_by_key(Migration::version);
        if let Some(pair) = migrations
            .windows(2)
            .find(|pair| pair[0].version() == pair[1].version())
        {
            return Err(MigrateError::definition(
                pair[1].id().to_string(),
                format!("version {} is already used by {}", pair[1].version(), pair[0].id()),
            ));
        }

        Ok(Self {
            migrations,
            sink: Box::new(TracingSink),
        })
    }

    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Replays every migration against an empty schema model and checks
    /// that each `down` undoes exactly what its `up` did. Touches no
    /// database.
    pub fn validate(&self) -> Result<()> {
        let mut model = SchemaModel::new();
        for migration in &self.migrations {
            let before = model.clone();
            step(&mut model, migration, Direction::Up)?;

            let mut reverted = model.clone();
            step(&mut reverted, migration, Direction::Down)?;
            if reverted != before {
                return Err(MigrateError::Irreversible(migration.id().clone()));
            }
        }
        Ok(())
    }

    /// Apply pending migrations in ascending order, up to and including
    /// `target` when given. Stops at the first failure.
    pub fn up(&self, conn: &mut Connection, target: Option<u32>) -> Result<RunReport> {
        self.with_lock(conn, |conn| {
            let applied = self.applied_prefix(conn)?;
            let pending = self.pending_up(applied, target)?;
            let mut report = RunReport::new(Direction::Up, applied);

            if pending.is_empty() {
                info!(applied, "schema is up to date");
                return Ok(report);
            }

            info!(pending = pending.len(), "applying migrations");
            let mut model = self.model_at(applied)?;
            for migration in pending {
                let statements = step(&mut model, migration, Direction::Up)?;
                self.execute(conn, migration, Direction::Up, &statements)?;
                report.completed.push(migration.id().clone());
            }
            Ok(report)
        })
    }

    /// Revert the latest `steps` applied migrations, newest first.
    pub fn down(&self, conn: &mut Connection, steps: usize) -> Result<RunReport> {
        self.with_lock(conn, |conn| {
            let applied = self.applied_prefix(conn)?;
            self.revert_latest(conn, applied, steps)
        })
    }

    /// Revert one migration by version. Only the most recently applied
    /// migration can be reverted this way.
    pub fn revert(&self, conn: &mut Connection, version: u32) -> Result<RunReport> {
        self.with_lock(conn, |conn| {
            let applied = self.applied_prefix(conn)?;
            let position = self.position(version)?;

            if position >= applied {
                return Err(MigrateError::NotApplied(
                    self.migrations[position].id().clone(),
                ));
            }
            if position + 1 != applied {
                return Err(MigrateError::OutOfOrderMigration {
                    id: self.migrations[position].id().clone(),
                    applied: self.migrations[applied - 1].id().clone(),
                });
            }

            self.revert_latest(conn, applied, 1)
        })
    }

    /// What `up` would execute, without executing it.
    pub fn plan_up(&self, conn: &Connection, target: Option<u32>) -> Result<Vec<PlannedStep>> {
        let applied = self.applied_prefix(conn)?;
        let pending = self.pending_up(applied, target)?;
        let mut model = self.model_at(applied)?;
        pending
            .iter()
            .map(|migration| planned(&mut model, migration, Direction::Up))
            .collect()
    }

    /// What `down` would execute, without executing it.
    pub fn plan_down(&self, conn: &Connection, steps: usize) -> Result<Vec<PlannedStep>> {
        let applied = self.applied_prefix(conn)?;
        let mut model = self.model_at(applied)?;
        self.migrations[..applied]
            .iter()
            .rev()
            .take(steps)
            .map(|migration| planned(&mut model, migration, Direction::Down))
            .collect()
    }

    /// Applied state of every known migration. Unlike the other operations
    /// this reports inconsistencies instead of failing on them.
    pub fn status(&self, conn: &Connection) -> Result<StatusReport> {
        let records = record::load(conn)?;

        let migrations = self
            .migrations
            .iter()
            .map(|migration| {
                let state = match records.iter().find(|r| &r.id == migration.id()) {
                    None => MigrationState::Pending,
                    Some(r) if r.checksum == migration.checksum() => MigrationState::Applied {
                        applied_at: r.applied_at,
                    },
                    Some(r) => MigrationState::Modified {
                        applied_at: r.applied_at,
                    },
                };
                MigrationStatus {
                    id: migration.id().clone(),
                    state,
                }
            })
            .collect();

        let orphaned = records
            .iter()
            .filter(|r| !self.migrations.iter().any(|m| m.id() == &r.id))
            .cloned()
            .collect();

        Ok(StatusReport {
            migrations,
            orphaned,
            lock: lock::current(conn)?,
        })
    }

    /// Clear a lock left behind by a runner that did not finish.
    pub fn unlock(&self, conn: &Connection) -> Result<Option<LockInfo>> {
        lock::force_release(conn)
    }

    fn with_lock<T>(
        &self,
        conn: &mut Connection,
        run: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        record::ensure_table(conn)?;
        let lock = MigrationLock::acquire(conn)?;

        let outcome = run(conn);
        let released = lock.release(conn);

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("failed to release migration lock: {release_err}");
                Err(e)
            }
        }
    }

    /// Number of applied migrations, after checking that the record is a
    /// prefix of the definitions and that nothing applied was edited.
    fn applied_prefix(&self, conn: &Connection) -> Result<usize> {
        let records = record::load(conn)?;
        self.reconcile(&records)
    }

    fn reconcile(&self, records: &[AppliedMigration]) -> Result<usize> {
        for (index, applied) in records.iter().enumerate() {
            let Some(position) = self
                .migrations
                .iter()
                .position(|m| m.version() == applied.id.version)
            else {
                return Err(MigrateError::UnknownMigration(applied.id.clone()));
            };

            let migration = &self.migrations[position];
            if migration.id() != &applied.id {
                return Err(MigrateError::UnknownMigration(applied.id.clone()));
            }
            // Records are sorted, so a later position means a gap before it.
            if position != index {
                return Err(MigrateError::OutOfOrderMigration {
                    id: self.migrations[index].id().clone(),
                    applied: applied.id.clone(),
                });
            }
            if migration.checksum() != applied.checksum {
                return Err(MigrateError::ChecksumMismatch {
                    id: applied.id.clone(),
                    recorded: applied.checksum.clone(),
                    current: migration.checksum().to_string(),
                });
            }
        }
        Ok(records.len())
    }

    fn pending_up(&self, applied: usize, target: Option<u32>) -> Result<&[Migration]> {
        let end = match target {
            None => self.migrations.len(),
            Some(version) => self.position(version)? + 1,
        };
        Ok(if end > applied {
            &self.migrations[applied..end]
        } else {
            &[]
        })
    }

    fn position(&self, version: u32) -> Result<usize> {
        self.migrations
            .iter()
            .position(|m| m.version() == version)
            .ok_or(MigrateError::NoSuchVersion(version))
    }

    /// Schema after the first `applied` migrations.
    fn model_at(&self, applied: usize) -> Result<SchemaModel> {
        let mut model = SchemaModel::new();
        for migration in &self.migrations[..applied] {
            step(&mut model, migration, Direction::Up)?;
        }
        Ok(model)
    }

    fn revert_latest(&self, conn: &mut Connection, applied: usize, steps: usize) -> Result<RunReport> {
        let mut report = RunReport::new(Direction::Down, applied);
        if steps == 0 || applied == 0 {
            info!(applied, "nothing to revert");
            return Ok(report);
        }

        let mut model = self.model_at(applied)?;
        for migration in self.migrations[..applied].iter().rev().take(steps) {
            let statements = step(&mut model, migration, Direction::Down)?;
            self.execute(conn, migration, Direction::Down, &statements)?;
            report.completed.push(migration.id().clone());
        }
        Ok(report)
    }

    /// Run the statements and update the record in one transaction.
    fn execute(
        &self,
        conn: &mut Connection,
        migration: &Migration,
        direction: Direction,
        statements: &[String],
    ) -> Result<()> {
        let started = Instant::now();
        let fail = |e: rusqlite::Error| MigrateError::failed(migration.id(), direction, e);

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(fail)?;

        for statement in statements {
            debug!(migration = %migration.id(), "{statement}");
            tx.execute_batch(statement).map_err(fail)?;
        }

        let recorded = match direction {
            Direction::Up => record::insert(&tx, migration, Utc::now()),
            Direction::Down => record::remove(&tx, migration.version()),
        };
        recorded.map_err(fail)?;

        tx.commit().map_err(fail)?;

        self.sink.step_completed(&Progress {
            id: migration.id().clone(),
            direction,
            elapsed: started.elapsed(),
        });
        Ok(())
    }
}

/// Advance `model` through one migration, returning the SQL for it.
fn step(model: &mut SchemaModel, migration: &Migration, direction: Direction) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for change in migration.changes(direction) {
        model
            .apply(change)
            .map_err(|e| MigrateError::failed(migration.id(), direction, e))?;
        statements.extend(
            sql::render(change, model)
                .map_err(|e| MigrateError::failed(migration.id(), direction, e))?,
        );
    }
    Ok(statements)
}

fn planned(model: &mut SchemaModel, migration: &Migration, direction: Direction) -> Result<PlannedStep> {
    Ok(PlannedStep {
        id: migration.id().clone(),
        direction,
        statements: step(model, migration, direction)?,
    })
}
