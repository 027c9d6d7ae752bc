//! In-memory pipeline store. Same atomicity model as the task store: one
//! lock per call, so conditional updates behave like single SQL statements.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::TaskId;
use crate::error::KilnError;
use crate::pipeline::store::{PieceRow, PipelineStore, SectorParams, SectorRow};
use crate::pipeline::zerocomm::Commitment;

#[derive(Default)]
struct State {
    sectors: HashMap<(i64, i64), SectorRow>,
    pieces: HashMap<(i64, i64), Vec<PieceRow>>,
}

#[derive(Default)]
pub struct InMemoryPipelineStore {
    state: Mutex<State>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn create_sector(
        &self,
        params: SectorParams,
        mut pieces: Vec<PieceRow>,
    ) -> Result<(), KilnError> {
        let key = (params.sp_id, params.sector_number);
        let mut state = self.state.lock().await;
        if state.sectors.contains_key(&key) {
            return Err(KilnError::Store(format!(
                "sector {}/{} already exists",
                params.sp_id, params.sector_number
            )));
        }
        pieces.sort_by_key(|p| p.piece_index);
        state.sectors.insert(key, SectorRow::new(params));
        state.pieces.insert(key, pieces);
        Ok(())
    }

    async fn sectors_missing_sdr_task(&self) -> Result<Vec<(i64, i64)>, KilnError> {
        let state = self.state.lock().await;
        let mut keys: Vec<(i64, i64)> = state
            .sectors
            .values()
            .filter(|row| row.task_id_sdr.is_none())
            .map(|row| (row.params.sp_id, row.params.sector_number))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_sdr_task(
        &self,
        sp_id: i64,
        sector_number: i64,
        task: TaskId,
    ) -> Result<u64, KilnError> {
        let mut state = self.state.lock().await;
        // UPDATE ... SET task_id_sdr = $task WHERE ... AND task_id_sdr IS NULL
        match state.sectors.get_mut(&(sp_id, sector_number)) {
            Some(row) if row.task_id_sdr.is_none() => {
                row.task_id_sdr = Some(task);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn sectors_by_sdr_task(&self, task: TaskId) -> Result<Vec<SectorParams>, KilnError> {
        let state = self.state.lock().await;
        Ok(state
            .sectors
            .values()
            .filter(|row| row.task_id_sdr == Some(task))
            .map(|row| row.params)
            .collect())
    }

    async fn pieces(&self, sp_id: i64, sector_number: i64) -> Result<Vec<PieceRow>, KilnError> {
        let state = self.state.lock().await;
        Ok(state
            .pieces
            .get(&(sp_id, sector_number))
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_sdr_done(
        &self,
        sp_id: i64,
        sector_number: i64,
        ticket_epoch: i64,
        ticket_value: [u8; 32],
    ) -> Result<u64, KilnError> {
        let mut state = self.state.lock().await;
        match state.sectors.get_mut(&(sp_id, sector_number)) {
            Some(row) => {
                row.after_sdr = true;
                row.ticket_epoch = Some(ticket_epoch);
                row.ticket_value = Some(ticket_value);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_trees_task(
        &self,
        sp_id: i64,
        sector_number: i64,
        task: TaskId,
    ) -> Result<u64, KilnError> {
        let mut state = self.state.lock().await;
        match state.sectors.get_mut(&(sp_id, sector_number)) {
            Some(row) if row.task_id_trees.is_none() => {
                row.task_id_trees = Some(task);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn sectors_by_trees_task(&self, task: TaskId) -> Result<Vec<SectorRow>, KilnError> {
        let state = self.state.lock().await;
        Ok(state
            .sectors
            .values()
            .filter(|row| row.task_id_trees == Some(task))
            .cloned()
            .collect())
    }

    async fn mark_trees_done(
        &self,
        sp_id: i64,
        sector_number: i64,
        tree_r_cid: Commitment,
    ) -> Result<u64, KilnError> {
        let mut state = self.state.lock().await;
        match state.sectors.get_mut(&(sp_id, sector_number)) {
            Some(row) => {
                row.after_trees = true;
                row.tree_r_cid = Some(tree_r_cid);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn sector_row(
        &self,
        sp_id: i64,
        sector_number: i64,
    ) -> Result<Option<SectorRow>, KilnError> {
        let state = self.state.lock().await;
        Ok(state.sectors.get(&(sp_id, sector_number)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RegisteredSealProof;

    fn params() -> SectorParams {
        SectorParams {
            sp_id: 1000,
            sector_number: 1,
            reg_seal_proof: RegisteredSealProof::StackedDrg2KiBV1,
        }
    }

    #[tokio::test]
    async fn sdr_task_column_is_set_once() {
        let store = InMemoryPipelineStore::new();
        store.create_sector(params(), vec![]).await.unwrap();

        let first = TaskId::generate();
        let second = TaskId::generate();
        assert_eq!(store.set_sdr_task(1000, 1, first).await.unwrap(), 1);
        assert_eq!(store.set_sdr_task(1000, 1, second).await.unwrap(), 0);

        let rows = store.sectors_by_sdr_task(first).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store.sectors_by_sdr_task(second).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_sector_update_affects_zero_rows() {
        let store = InMemoryPipelineStore::new();
        let n = store.mark_sdr_done(1, 2, 100, [0u8; 32]).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn pieces_come_back_in_index_order() {
        let store = InMemoryPipelineStore::new();
        let pieces = vec![
            PieceRow {
                piece_index: 1,
                piece_cid: "baga-b".into(),
                piece_size: 1024,
            },
            PieceRow {
                piece_index: 0,
                piece_cid: "baga-a".into(),
                piece_size: 1024,
            },
        ];
        store.create_sector(params(), pieces).await.unwrap();

        let got = store.pieces(1000, 1).await.unwrap();
        assert_eq!(got[0].piece_index, 0);
        assert_eq!(got[1].piece_index, 1);
    }
}
