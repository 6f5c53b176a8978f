//! Plain-text rendering of runner results for the terminal.

use std::fmt::Write;

use studygroups_db::{Direction, LockInfo, MigrationState, PlannedStep, RunReport, StatusReport};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn run(report: &RunReport) -> String {
    if report.is_noop() {
        return match report.direction {
            Direction::Up => format!(
                "Schema is up to date ({} applied).",
                report.previously_applied
            ),
            Direction::Down => "Nothing to revert.".to_string(),
        };
    }

    let verb = match report.direction {
        Direction::Up => "Applied",
        Direction::Down => "Reverted",
    };
    let mut out = format!("{verb} {} migration(s):", report.completed.len());
    for id in &report.completed {
        let _ = write!(out, "\n  {id}");
    }
    out
}

pub fn plan(steps: &[PlannedStep]) -> String {
    if steps.is_empty() {
        return "Nothing to do.".to_string();
    }

    let mut out = String::new();
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "-- {} ({})", step.id, step.direction);
        for statement in &step.statements {
            let _ = write!(out, "\n{statement};");
        }
    }
    out
}

pub fn status(report: &StatusReport) -> String {
    let mut out = String::new();
    let width = report
        .migrations
        .iter()
        .map(|m| m.id.to_string().len())
        .max()
        .unwrap_or(0);

    for migration in &report.migrations {
        let state = match &migration.state {
            MigrationState::Pending => "pending".to_string(),
            MigrationState::Applied { applied_at } => {
                format!("applied  {}", applied_at.format(TIME_FORMAT))
            }
            MigrationState::Modified { applied_at } => format!(
                "MODIFIED {} (definition changed since it was applied)",
                applied_at.format(TIME_FORMAT)
            ),
        };
        let _ = writeln!(out, "{:<width$}  {state}", migration.id.to_string());
    }
    if report.migrations.is_empty() {
        out.push_str("No migrations defined.\n");
    }

    for orphan in &report.orphaned {
        let _ = writeln!(
            out,
            "{:<width$}  UNKNOWN  recorded {} but not defined",
            orphan.id.to_string(),
            orphan.applied_at.format(TIME_FORMAT)
        );
    }

    match &report.lock {
        Some(info) => out.push_str(&locked(info)),
        None => out.push_str("Lock: free"),
    }
    out
}

fn locked(info: &LockInfo) -> String {
    format!(
        "Lock: held by {} (pid {}) since {}",
        info.holder, info.pid, info.acquired_at
    )
}

pub fn unlocked(released: Option<&LockInfo>) -> String {
    match released {
        Some(info) => format!(
            "Released lock held by {} (pid {}) since {}.",
            info.holder, info.pid, info.acquired_at
        ),
        None => "Lock was not held.".to_string(),
    }
}
