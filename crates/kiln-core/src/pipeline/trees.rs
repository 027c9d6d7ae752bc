//! Trees stage: builds the commitment trees over the SDR layers.
//!
//! Follows SDR: a candidate whose `after_sdr` flag is unset is never
//! accepted, even if its task row is visible — the stage flag, not the row's
//! existence, is the dependency gate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::store::PipelineStore;
use super::{SealPoller, SectorRef, TASK_NAME_SDR, TASK_NAME_TREES};
use crate::domain::{Resources, TaskId, TaskTypeDetails};
use crate::engine::{AcceptData, Admitted, NoAcceptData, OwnershipToken, TaskInterface, TaskPoster};
use crate::error::KilnError;
use crate::ports::sealer::SealerApi;

const GIB: u64 = 1 << 30;

pub struct TreesTask {
    db: Arc<dyn PipelineStore>,
    poller: Arc<SealPoller>,
    sealer: Arc<dyn SealerApi>,
    max: usize,
    devnet: bool,
}

impl TreesTask {
    pub fn new(
        poller: Arc<SealPoller>,
        sealer: Arc<dyn SealerApi>,
        max: usize,
        devnet: bool,
    ) -> Self {
        Self {
            db: Arc::clone(poller.store()),
            poller,
            sealer,
            max,
            devnet,
        }
    }
}

#[async_trait]
impl TaskInterface for TreesTask {
    async fn can_accept(&self, ids: &[TaskId]) -> Result<Option<Admitted>, KilnError> {
        for &id in ids {
            let rows = match self.db.sectors_by_trees_task(id).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(task = %id, error = %e, "getting sector row");
                    continue;
                }
            };
            let [row] = rows.as_slice() else {
                warn!(task = %id, count = rows.len(), "expected 1 sector for trees task");
                continue;
            };

            if !row.after_sdr {
                // Upstream stage not recorded yet; not ours to take.
                continue;
            }

            return Ok(Some(Admitted::new(id, NoAcceptData)));
        }

        Ok(None)
    }

    async fn do_task(
        &self,
        id: TaskId,
        _data: Box<dyn AcceptData>,
        owned: &OwnershipToken,
    ) -> Result<bool, KilnError> {
        let rows = self.db.sectors_by_trees_task(id).await?;
        if rows.len() != 1 {
            return Err(KilnError::CorrectnessViolation {
                expected: 1,
                got: rows.len() as u64,
            });
        }
        let row = &rows[0];

        if !row.after_sdr {
            return Err(KilnError::other("trees scheduled before sdr completed"));
        }

        if !owned.still_owned() {
            return Ok(false);
        }

        let sref = SectorRef {
            sp_id: row.params.sp_id,
            sector_number: row.params.sector_number,
            proof: row.params.reg_seal_proof,
        };
        let sealed = self.sealer.build_trees(&sref).await?;

        let n = self
            .db
            .mark_trees_done(row.params.sp_id, row.params.sector_number, sealed)
            .await?;
        if n != 1 {
            return Err(KilnError::CorrectnessViolation {
                expected: 1,
                got: n,
            });
        }

        Ok(true)
    }

    fn type_details(&self) -> TaskTypeDetails {
        let mut cost = Resources {
            cpu: 1.0,
            gpu: 1.0,
            ram: 8 * GIB,
        };
        if self.devnet {
            cost.gpu = 0.0;
            cost.ram = GIB;
        }

        TaskTypeDetails {
            name: TASK_NAME_TREES.to_string(),
            max_concurrent: self.max,
            cost,
            max_failures: 3,
            follows: vec![TASK_NAME_SDR.to_string()],
        }
    }

    fn adder(&self, poster: TaskPoster) {
        self.poller.set_trees_poster(poster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::impls::{DemoSealer, InMemoryBlobStore, InMemoryPipelineStore};
    use crate::pipeline::store::SectorParams;
    use crate::pipeline::{RegisteredSealProof, SealPoller};
    use crate::ports::blob_store::BlobStore;

    fn task() -> (TreesTask, Arc<dyn PipelineStore>) {
        let db: Arc<dyn PipelineStore> = Arc::new(InMemoryPipelineStore::new());
        let poller = SealPoller::new(Arc::clone(&db));
        let sealer = Arc::new(DemoSealer::new(
            Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>,
        ));
        (TreesTask::new(poller, sealer, 1, true), db)
    }

    fn params() -> SectorParams {
        SectorParams {
            sp_id: 1000,
            sector_number: 1,
            reg_seal_proof: RegisteredSealProof::StackedDrg2KiBV1,
        }
    }

    #[tokio::test]
    async fn candidates_without_after_sdr_are_never_accepted() {
        let (trees, db) = task();
        db.create_sector(params(), vec![]).await.unwrap();

        let id = TaskId::generate();
        assert_eq!(db.set_trees_task(1000, 1, id).await.unwrap(), 1);

        // Row exists but the upstream flag is unset.
        assert!(trees.can_accept(&[id]).await.unwrap().is_none());

        db.mark_sdr_done(1000, 1, 9100, [0u8; 32]).await.unwrap();
        let admitted = trees.can_accept(&[id]).await.unwrap().unwrap();
        assert_eq!(admitted.id, id);
    }

    #[tokio::test]
    async fn missing_sector_row_is_a_correctness_violation() {
        let (trees, _db) = task();

        let err = trees
            .do_task(TaskId::generate(), Box::new(NoAcceptData), &OwnershipToken::standing())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KilnError::CorrectnessViolation { expected: 1, got: 0 }
        ));
    }
}
