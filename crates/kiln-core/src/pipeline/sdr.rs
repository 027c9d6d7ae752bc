//! SDR stage: layer generation, the first pipeline task.
//!
//! Admission reserves SDR scratch space for the sector before the candidate
//! is returned, so a worker never claims a sector it cannot fit on disk.
//! The reservation rides in the admission data and is finished exactly once:
//! committed after the success row-update, released by `not_claimed` or by
//! drop on any failure path.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::store::PipelineStore;
use super::zerocomm;
use super::{SealPoller, SectorRef, TASK_NAME_SDR};
use crate::domain::{Resources, TaskId, TaskTypeDetails};
use crate::engine::{AcceptData, Admitted, OwnershipToken, TaskInterface, TaskPoster};
use crate::error::KilnError;
use crate::ports::chain_api::{ChainApi, DomainSeparationTag, SEAL_RANDOMNESS_LOOKBACK};
use crate::ports::sealer::SealerApi;
use crate::reservation::{Reservation, ReservationManager};

const GIB: u64 = 1 << 30;

pub struct SdrTask {
    api: Arc<dyn ChainApi>,
    db: Arc<dyn PipelineStore>,
    poller: Arc<SealPoller>,
    sealer: Arc<dyn SealerApi>,
    storage: Arc<ReservationManager>,
    max: usize,
    devnet: bool,
}

impl SdrTask {
    pub fn new(
        api: Arc<dyn ChainApi>,
        poller: Arc<SealPoller>,
        sealer: Arc<dyn SealerApi>,
        storage: Arc<ReservationManager>,
        max: usize,
        devnet: bool,
    ) -> Self {
        Self {
            api,
            db: Arc::clone(poller.store()),
            poller,
            sealer,
            storage,
            max,
            devnet,
        }
    }

    /// Seal ticket: randomness drawn a fixed lookback behind the chain head,
    /// with the provider id as entropy. API failures are retryable; rely on
    /// the engine's generic retry.
    async fn get_ticket(&self, sp_id: i64) -> Result<([u8; 32], i64), KilnError> {
        let head = self.api.chain_head().await?;
        let ticket_epoch = head.height - SEAL_RANDOMNESS_LOOKBACK;
        let entropy = sp_id.to_be_bytes();

        let rand = self
            .api
            .randomness_from_tickets(
                DomainSeparationTag::SealRandomness,
                ticket_epoch,
                &entropy,
                &head.key,
            )
            .await?;

        Ok((rand, ticket_epoch))
    }

    async fn sector_params(&self, id: TaskId) -> Result<super::SectorParams, KilnError> {
        let rows = self.db.sectors_by_sdr_task(id).await?;
        if rows.len() != 1 {
            return Err(KilnError::CorrectnessViolation {
                expected: 1,
                got: rows.len() as u64,
            });
        }
        Ok(rows[0])
    }
}

pub(crate) struct SdrTaskData {
    reservation: Option<Reservation>,
}

impl AcceptData for SdrTaskData {
    fn not_claimed(&mut self) {
        if let Some(res) = self.reservation.take() {
            res.release();
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
impl TaskInterface for SdrTask {
    async fn can_accept(&self, ids: &[TaskId]) -> Result<Option<Admitted>, KilnError> {
        for &id in ids {
            let params = match self.db.sectors_by_sdr_task(id).await {
                Ok(rows) if rows.len() == 1 => rows[0],
                Ok(rows) => {
                    warn!(task = %id, count = rows.len(), "expected 1 sector for sdr task");
                    continue;
                }
                Err(e) => {
                    warn!(task = %id, error = %e, "getting sector params");
                    continue;
                }
            };

            let need = self.sealer.sdr_scratch_bytes(params.reg_seal_proof);
            let reservation = match self.storage.reserve(need) {
                Ok(r) => r,
                Err(e) => {
                    warn!(task = %id, error = %e, "reserving sdr storage");
                    continue;
                }
            };

            return Ok(Some(Admitted::new(
                id,
                SdrTaskData {
                    reservation: Some(reservation),
                },
            )));
        }

        Ok(None)
    }

    async fn do_task(
        &self,
        id: TaskId,
        mut data: Box<dyn AcceptData>,
        owned: &OwnershipToken,
    ) -> Result<bool, KilnError> {
        let data = data
            .as_any_mut()
            .downcast_mut::<SdrTaskData>()
            .ok_or(KilnError::AdmissionDataMismatch(id))?;
        let reservation = data
            .reservation
            .take()
            .ok_or(KilnError::AdmissionDataMismatch(id))?;

        let params = self.sector_params(id).await?;

        // Retry after a failed Trees handoff: the stage itself already
        // completed durably and its scratch space is committed, so skip the
        // sealer, return this attempt's hold, and only repost Trees.
        if let Some(row) = self
            .db
            .sector_row(params.sp_id, params.sector_number)
            .await?
        {
            if row.after_sdr {
                reservation.release();
                self.poller
                    .post_trees(params.sp_id, params.sector_number)
                    .await?;
                return Ok(true);
            }
        }

        let pieces = self
            .db
            .pieces(params.sp_id, params.sector_number)
            .await?;

        let proof = params.reg_seal_proof;
        let commd = if pieces.is_empty() {
            zerocomm::zero_commitment(proof.sector_size())
        } else {
            zerocomm::unsealed_commitment(proof, &pieces)
        };

        let (ticket, ticket_epoch) = self.get_ticket(params.sp_id).await?;

        if !owned.still_owned() {
            return Ok(false);
        }

        let sref = SectorRef {
            sp_id: params.sp_id,
            sector_number: params.sector_number,
            proof,
        };
        self.sealer
            .generate_sdr(&sref, &reservation, &ticket, &commd)
            .await?;

        let n = self
            .db
            .mark_sdr_done(params.sp_id, params.sector_number, ticket_epoch, ticket)
            .await?;
        if n != 1 {
            return Err(KilnError::CorrectnessViolation {
                expected: 1,
                got: n,
            });
        }

        // Scratch space is now durably consumed by the layers on disk.
        reservation.commit();

        self.poller
            .post_trees(params.sp_id, params.sector_number)
            .await?;

        Ok(true)
    }

    fn type_details(&self) -> TaskTypeDetails {
        let mut cost = Resources {
            cpu: 4.0,
            gpu: 0.0,
            ram: 54 * GIB,
        };
        if self.devnet {
            cost.ram = GIB;
        }

        TaskTypeDetails {
            name: TASK_NAME_SDR.to_string(),
            max_concurrent: self.max,
            cost,
            max_failures: 2,
            follows: Vec::new(),
        }
    }

    fn adder(&self, poster: TaskPoster) {
        self.poller.set_sdr_poster(poster);
    }

    async fn bored(&self, _poster: &TaskPoster) {
        if let Err(e) = self.poller.post_sdr_for_new_sectors().await {
            warn!(error = %e, "sdr bootstrap scan failed");
        }
    }
}
