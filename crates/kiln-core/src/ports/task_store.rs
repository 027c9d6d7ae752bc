//! TaskStore port: the shared table of work items.
//!
//! This is the only resource mutated across worker processes, and `claim` is
//! the only operation that must be a true conditional write (`WHERE owner IS
//! NULL` semantics, first writer wins). Scans are approximately-fresh
//! snapshots; the claim, not the scan, is the source of truth for ownership.
//! Callers must treat lost claim races as the common case.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{TaskCounts, TaskId, TaskRow, WorkerId};
use crate::error::KilnError;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert an unowned row for `name`. Returns the new task id.
    async fn add(&self, name: &str) -> Result<TaskId, KilnError>;

    /// Remove a row that was added but whose domain bookkeeping failed
    /// (the rollback half of a transactional post).
    async fn remove(&self, id: TaskId) -> Result<(), KilnError>;

    /// Unclaimed, non-terminal rows of `name` whose `retry_at` has passed.
    /// Stores that enforce an ownership lease also include owned rows whose
    /// lease has lapsed, so a crashed worker's claims come back into scans.
    async fn unowned(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<TaskId>, KilnError>;

    /// Conditional claim: succeeds only if the row is still unowned (or its
    /// owner's lease has lapsed, where the store enforces one). Returns
    /// `false` on a lost race (not an error).
    async fn claim(&self, id: TaskId, worker: WorkerId) -> Result<bool, KilnError>;

    /// Drop a claim without recording an attempt (e.g., local capacity raced
    /// away after the store claim succeeded). Owner must match.
    async fn release(&self, id: TaskId, worker: WorkerId) -> Result<(), KilnError>;

    /// Record a failed attempt: increments and returns the failure count and
    /// stores the error. The row stays owned until the caller decides
    /// between `schedule_retry` and `mark_permanently_failed`.
    async fn record_failure(&self, id: TaskId, error: &str) -> Result<u32, KilnError>;

    /// Release the row for a later attempt, invisible to scans until
    /// `retry_at`.
    async fn schedule_retry(&self, id: TaskId, retry_at: DateTime<Utc>) -> Result<(), KilnError>;

    /// Terminally fail the row; it is never re-offered.
    async fn mark_permanently_failed(&self, id: TaskId) -> Result<(), KilnError>;

    /// Mark the row complete.
    async fn mark_done(&self, id: TaskId) -> Result<(), KilnError>;

    async fn row(&self, id: TaskId) -> Result<Option<TaskRow>, KilnError>;

    /// Status view.
    async fn counts_by_state(&self) -> Result<TaskCounts, KilnError>;
}
