use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use crate::migration::{Direction, MigrationId};

/// Emitted after each migration step commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub id: MigrationId,
    pub direction: Direction,
    pub elapsed: Duration,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        };
        write!(
            f,
            "{verb} {} ({}) in {}ms",
            self.id,
            self.direction,
            self.elapsed.as_millis()
        )
    }
}

/// Receives a notification for every completed step.
pub trait ProgressSink: Send + Sync {
    fn step_completed(&self, progress: &Progress);
}

/// Default sink: one `info` event per step.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn step_completed(&self, progress: &Progress) {
        info!(
            migration = %progress.id,
            direction = %progress.direction,
            elapsed_ms = elapsed_ms(progress.elapsed),
            "{progress}"
        );
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Keeps every notification in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Progress>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Progress> {
        self.lock().clone()
    }

    /// `(id, direction)` pairs, without timings.
    pub fn steps(&self) -> Vec<(String, Direction)> {
        self.lock()
            .iter()
            .map(|p| (p.id.to_string(), p.direction))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Progress>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProgressSink for RecordingSink {
    fn step_completed(&self, progress: &Progress) {
        self.lock().push(progress.clone());
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<S> {
    fn step_completed(&self, progress: &Progress) {
        (**self).step_completed(progress)
    }
}
