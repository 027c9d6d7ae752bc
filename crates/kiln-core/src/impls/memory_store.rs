//! In-memory task store.
//!
//! Models the relational store's conditional updates: every port call takes
//! the single map lock, so each call is atomic exactly the way a single SQL
//! statement would be. Used by tests and the demo binary; a real deployment
//! points several workers at a shared database behind the same port.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{TaskCounts, TaskId, TaskRow, TaskRowState, WorkerId};
use crate::error::KilnError;
use crate::ports::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    rows: Mutex<HashMap<TaskId, TaskRow>>,
    /// Ownership lease. `None` means claims never expire.
    lease: Option<chrono::Duration>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `Owned` rows as claimable again once their owner has gone
    /// `lease` without touching them, so a crashed worker's claims come back
    /// into rotation instead of being stranded forever.
    pub fn with_lease(lease: chrono::Duration) -> Self {
        Self {
            rows: Mutex::default(),
            lease: Some(lease),
        }
    }

    fn lease_expired(&self, row: &TaskRow, now: DateTime<Utc>) -> bool {
        self.lease
            .is_some_and(|l| row.state == TaskRowState::Owned && now - row.updated_at > l)
    }
}

fn missing(id: TaskId) -> KilnError {
    KilnError::Store(format!("no such task row {id}"))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn add(&self, name: &str) -> Result<TaskId, KilnError> {
        let id = TaskId::generate();
        let mut rows = self.rows.lock().await;
        rows.insert(id, TaskRow::new(id, name));
        Ok(id)
    }

    async fn remove(&self, id: TaskId) -> Result<(), KilnError> {
        let mut rows = self.rows.lock().await;
        rows.remove(&id).map(|_| ()).ok_or_else(|| missing(id))
    }

    async fn unowned(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<TaskId>, KilnError> {
        let rows = self.rows.lock().await;
        let mut ids: Vec<TaskId> = rows
            .values()
            .filter(|r| r.name == name && (r.is_claimable(now) || self.lease_expired(r, now)))
            .map(|r| r.id)
            .collect();
        // ULIDs sort by creation time; keep scans roughly FIFO.
        ids.sort();
        Ok(ids)
    }

    async fn claim(&self, id: TaskId, worker: WorkerId) -> Result<bool, KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;

        // UPDATE ... SET owner = $worker WHERE id = $id AND (owner IS NULL
        // OR updated_at < now() - lease)
        let expired = self.lease_expired(row, Utc::now());
        if (row.owner.is_some() || row.state != TaskRowState::Pending) && !expired {
            return Ok(false);
        }
        row.owner = Some(worker);
        row.state = TaskRowState::Owned;
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn release(&self, id: TaskId, worker: WorkerId) -> Result<(), KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;
        if row.owner != Some(worker) {
            return Err(KilnError::Store(format!(
                "release of {id} by non-owner {worker}"
            )));
        }
        row.owner = None;
        row.state = TaskRowState::Pending;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn record_failure(&self, id: TaskId, error: &str) -> Result<u32, KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;
        row.failures += 1;
        row.last_error = Some(error.to_string());
        row.updated_at = Utc::now();
        Ok(row.failures)
    }

    async fn schedule_retry(&self, id: TaskId, retry_at: DateTime<Utc>) -> Result<(), KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;
        row.owner = None;
        row.state = TaskRowState::Pending;
        row.retry_at = Some(retry_at);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_permanently_failed(&self, id: TaskId) -> Result<(), KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;
        row.owner = None;
        row.state = TaskRowState::Failed;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_done(&self, id: TaskId) -> Result<(), KilnError> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id).ok_or_else(|| missing(id))?;
        row.owner = None;
        row.state = TaskRowState::Done;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn row(&self, id: TaskId) -> Result<Option<TaskRow>, KilnError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&id).cloned())
    }

    async fn counts_by_state(&self) -> Result<TaskCounts, KilnError> {
        let rows = self.rows.lock().await;
        let mut counts = TaskCounts::default();
        for row in rows.values() {
            match row.state {
                TaskRowState::Pending => counts.pending += 1,
                TaskRowState::Owned => counts.owned += 1,
                TaskRowState::Done => counts.done += 1,
                TaskRowState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = Arc::new(InMemoryTaskStore::new());
        let id = store.add("SDR").await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store.claim(id, WorkerId::generate()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for j in joins {
            if j.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn scheduled_retry_hides_row_until_due() {
        let store = InMemoryTaskStore::new();
        let id = store.add("SDR").await.unwrap();
        let worker = WorkerId::generate();

        assert!(store.claim(id, worker).await.unwrap());
        assert_eq!(store.record_failure(id, "boom").await.unwrap(), 1);

        let retry_at = Utc::now() + chrono::Duration::seconds(30);
        store.schedule_retry(id, retry_at).await.unwrap();

        assert!(store.unowned("SDR", Utc::now()).await.unwrap().is_empty());
        let later = retry_at + chrono::Duration::seconds(1);
        assert_eq!(store.unowned("SDR", later).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable_by_another_worker() {
        let store = InMemoryTaskStore::with_lease(chrono::Duration::milliseconds(20));
        let id = store.add("SDR").await.unwrap();
        let crashed = WorkerId::generate();

        assert!(store.claim(id, crashed).await.unwrap());

        // Within the lease the claim holds: the row is neither offered nor
        // claimable by anyone else.
        assert!(store.unowned("SDR", Utc::now()).await.unwrap().is_empty());
        assert!(!store.claim(id, WorkerId::generate()).await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        // Past the lease the row comes back into rotation and a successor
        // can take it over.
        assert_eq!(store.unowned("SDR", Utc::now()).await.unwrap(), vec![id]);
        let successor = WorkerId::generate();
        assert!(store.claim(id, successor).await.unwrap());

        // A late release by the crashed owner no longer matches.
        assert!(store.release(id, crashed).await.is_err());
        let row = store.row(id).await.unwrap().unwrap();
        assert_eq!(row.owner, Some(successor));
    }

    #[tokio::test]
    async fn permanently_failed_rows_are_never_offered() {
        let store = InMemoryTaskStore::new();
        let id = store.add("SDR").await.unwrap();
        store.mark_permanently_failed(id).await.unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert!(store
            .unowned("SDR", far_future)
            .await
            .unwrap()
            .is_empty());
        assert!(!store.claim(id, WorkerId::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_owner() {
        let store = InMemoryTaskStore::new();
        let id = store.add("SDR").await.unwrap();
        let owner = WorkerId::generate();

        assert!(store.claim(id, owner).await.unwrap());
        assert!(store.release(id, WorkerId::generate()).await.is_err());
        store.release(id, owner).await.unwrap();
        assert!(store.claim(id, WorkerId::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn unowned_filters_by_name() {
        let store = InMemoryTaskStore::new();
        let sdr = store.add("SDR").await.unwrap();
        let _trees = store.add("Trees").await.unwrap();

        assert_eq!(store.unowned("SDR", Utc::now()).await.unwrap(), vec![sdr]);
    }
}
