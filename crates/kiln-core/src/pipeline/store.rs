//! Pipeline store port: the sealing stages' relational rows.
//!
//! One row per `(sp_id, sector_number)` with per-stage flags and task-id
//! columns, plus a satellite table of ordered initial pieces. Mutating calls
//! return the affected-row count; callers treat anything but exactly one as
//! a `CorrectnessViolation` (a vanished or duplicated row), never as silent
//! success. Task-id columns are set conditionally (only when still unset),
//! which is what makes concurrent bootstrap safe.

use async_trait::async_trait;

use super::RegisteredSealProof;
use crate::domain::TaskId;
use crate::error::KilnError;
use crate::pipeline::zerocomm::Commitment;

/// Static sector parameters, as selected by task-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorParams {
    pub sp_id: i64,
    pub sector_number: i64,
    pub reg_seal_proof: RegisteredSealProof,
}

/// One ordered entry of the initial-pieces satellite table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceRow {
    pub piece_index: i64,
    pub piece_cid: String,
    /// Padded piece size in bytes.
    pub piece_size: i64,
}

/// Full pipeline row for one sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorRow {
    pub params: SectorParams,

    pub task_id_sdr: Option<TaskId>,
    pub task_id_trees: Option<TaskId>,

    pub after_sdr: bool,
    pub after_trees: bool,

    pub ticket_epoch: Option<i64>,
    pub ticket_value: Option<[u8; 32]>,
    pub tree_r_cid: Option<Commitment>,
}

impl SectorRow {
    pub fn new(params: SectorParams) -> Self {
        Self {
            params,
            task_id_sdr: None,
            task_id_trees: None,
            after_sdr: false,
            after_trees: false,
            ticket_epoch: None,
            ticket_value: None,
            tree_r_cid: None,
        }
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Insert a sector row with its ordered pieces.
    async fn create_sector(
        &self,
        params: SectorParams,
        pieces: Vec<PieceRow>,
    ) -> Result<(), KilnError>;

    /// Sectors with no SDR task posted yet (bootstrap scan).
    async fn sectors_missing_sdr_task(&self) -> Result<Vec<(i64, i64)>, KilnError>;

    /// Set `task_id_sdr` where it is still unset. Returns affected rows
    /// (0 when another worker already posted).
    async fn set_sdr_task(
        &self,
        sp_id: i64,
        sector_number: i64,
        task: TaskId,
    ) -> Result<u64, KilnError>;

    /// Rows whose `task_id_sdr` equals `task`. Returned as a list so the
    /// caller can enforce the exactly-one cardinality itself.
    async fn sectors_by_sdr_task(&self, task: TaskId) -> Result<Vec<SectorParams>, KilnError>;

    /// Ordered pieces (by `piece_index` ascending) for one sector.
    async fn pieces(&self, sp_id: i64, sector_number: i64) -> Result<Vec<PieceRow>, KilnError>;

    /// Persist SDR success: sets `after_sdr`, `ticket_epoch`,
    /// `ticket_value`. Returns affected rows.
    async fn mark_sdr_done(
        &self,
        sp_id: i64,
        sector_number: i64,
        ticket_epoch: i64,
        ticket_value: [u8; 32],
    ) -> Result<u64, KilnError>;

    /// Set `task_id_trees` where it is still unset. Returns affected rows.
    async fn set_trees_task(
        &self,
        sp_id: i64,
        sector_number: i64,
        task: TaskId,
    ) -> Result<u64, KilnError>;

    /// Rows whose `task_id_trees` equals `task`.
    async fn sectors_by_trees_task(&self, task: TaskId) -> Result<Vec<SectorRow>, KilnError>;

    /// Persist Trees success: sets `after_trees` and the sealed commitment.
    /// Returns affected rows.
    async fn mark_trees_done(
        &self,
        sp_id: i64,
        sector_number: i64,
        tree_r_cid: Commitment,
    ) -> Result<u64, KilnError>;

    async fn sector_row(
        &self,
        sp_id: i64,
        sector_number: i64,
    ) -> Result<Option<SectorRow>, KilnError>;
}
