//! Task row: the persisted, cross-worker shape of one unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, WorkerId};

/// Row state (generic engine columns only; domain payload lives in the
/// stage's own tables).
///
/// Transitions:
/// - Pending -> Owned -> Done
/// - Pending -> Owned -> Pending (failure, re-offered after `retry_at`)
/// - Pending -> Owned -> Failed (failure count exceeded `max_failures`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskRowState {
    /// Unclaimed; visible to candidate scans once `retry_at` has passed.
    Pending,

    /// Claimed by exactly one worker.
    Owned,

    /// Completed; retained for inspection, never re-offered.
    Done,

    /// Permanently failed; requires operator intervention.
    Failed,
}

impl TaskRowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskRowState::Done | TaskRowState::Failed)
    }
}

/// One task row as persisted in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub name: String,
    pub state: TaskRowState,

    /// Owning worker; `None` means unclaimed. The conditional update on this
    /// column is the single cross-process synchronization point.
    pub owner: Option<WorkerId>,

    /// Failed attempts so far.
    pub failures: u32,
    pub last_error: Option<String>,

    /// Earliest time the row may be re-offered after a failure.
    pub retry_at: Option<DateTime<Utc>>,

    pub posted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            state: TaskRowState::Pending,
            owner: None,
            failures: 0,
            last_error: None,
            retry_at: None,
            posted_at: now,
            updated_at: now,
        }
    }

    /// Is this row visible to a candidate scan at `now`?
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskRowState::Pending
            && self.owner.is_none()
            && self.retry_at.is_none_or(|at| at <= now)
    }
}

/// Per-state row counts, for status views.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub owned: usize,
    pub done: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_row_is_claimable() {
        let row = TaskRow::new(TaskId::generate(), "SDR");
        assert!(row.is_claimable(Utc::now()));
    }

    #[test]
    fn retry_at_gates_visibility() {
        let mut row = TaskRow::new(TaskId::generate(), "SDR");
        let now = Utc::now();
        row.retry_at = Some(now + Duration::seconds(10));
        assert!(!row.is_claimable(now));
        assert!(row.is_claimable(now + Duration::seconds(11)));
    }

    #[test]
    fn owned_and_terminal_rows_are_not_claimable() {
        let now = Utc::now();

        let mut row = TaskRow::new(TaskId::generate(), "SDR");
        row.state = TaskRowState::Owned;
        row.owner = Some(WorkerId::generate());
        assert!(!row.is_claimable(now));

        row.state = TaskRowState::Failed;
        row.owner = None;
        assert!(!row.is_claimable(now));
    }
}
