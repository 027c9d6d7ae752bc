//! The sealing pipeline: stages built on the engine's task contract.
//!
//! Two stages are wired here: SDR (layer generation) and Trees (commitment
//! tree building). SDR posts the Trees task on success, so the dependency
//! chain is store-driven; the engine's follower wake-ups only shorten the
//! scan delay.

pub mod sdr;
pub mod store;
pub mod trees;
pub mod zerocomm;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::TaskPoster;
use crate::error::KilnError;

pub use sdr::SdrTask;
pub use store::{PieceRow, PipelineStore, SectorParams, SectorRow};
pub use trees::TreesTask;

pub const TASK_NAME_SDR: &str = "SDR";
pub const TASK_NAME_TREES: &str = "Trees";

/// Registered proof type of a sector; fixes the padded sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisteredSealProof {
    StackedDrg2KiBV1,
    StackedDrg512MiBV1,
    StackedDrg32GiBV1,
    StackedDrg64GiBV1,
}

impl RegisteredSealProof {
    pub fn sector_size(self) -> u64 {
        match self {
            RegisteredSealProof::StackedDrg2KiBV1 => 2 << 10,
            RegisteredSealProof::StackedDrg512MiBV1 => 512 << 20,
            RegisteredSealProof::StackedDrg32GiBV1 => 32 << 30,
            RegisteredSealProof::StackedDrg64GiBV1 => 64 << 30,
        }
    }
}

/// Identity of a sector plus its proof type, as passed to the sealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    pub sp_id: i64,
    pub sector_number: i64,
    pub proof: RegisteredSealProof,
}

#[derive(Default)]
struct Posters {
    sdr: Option<TaskPoster>,
    trees: Option<TaskPoster>,
}

/// Pipeline-side coordinator: holds the posting handles the engine hands out
/// through each stage's `adder`, and turns pipeline state into task rows.
pub struct SealPoller {
    store: Arc<dyn PipelineStore>,
    posters: Mutex<Posters>,
}

impl SealPoller {
    pub fn new(store: Arc<dyn PipelineStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            posters: Mutex::new(Posters::default()),
        })
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub(crate) fn set_sdr_poster(&self, poster: TaskPoster) {
        let mut posters = self.posters.lock().unwrap_or_else(|e| e.into_inner());
        posters.sdr = Some(poster);
    }

    pub(crate) fn set_trees_poster(&self, poster: TaskPoster) {
        let mut posters = self.posters.lock().unwrap_or_else(|e| e.into_inner());
        posters.trees = Some(poster);
    }

    fn sdr_poster(&self) -> Option<TaskPoster> {
        self.posters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sdr
            .clone()
    }

    fn trees_poster(&self) -> Option<TaskPoster> {
        self.posters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .trees
            .clone()
    }

    /// Pipeline bootstrap: post an SDR task for every sector that has none
    /// yet. Driven by the SDR type's boredom hook. The task-id column update
    /// is conditional, so when several workers bootstrap concurrently only
    /// one post survives per sector.
    pub async fn post_sdr_for_new_sectors(&self) -> Result<(), KilnError> {
        let Some(poster) = self.sdr_poster() else {
            return Ok(());
        };

        for (sp_id, sector_number) in self.store.sectors_missing_sdr_task().await? {
            let store = &self.store;
            let posted = poster
                .post_if(|task_id| async move {
                    let n = store.set_sdr_task(sp_id, sector_number, task_id).await?;
                    Ok(n == 1)
                })
                .await?;
            if posted.is_none() {
                warn!(sp_id, sector_number, "sdr task already posted elsewhere");
            }
        }
        Ok(())
    }

    /// Hand a sector that finished SDR to the Trees stage. Called by the SDR
    /// body on success.
    pub(crate) async fn post_trees(&self, sp_id: i64, sector_number: i64) -> Result<(), KilnError> {
        let Some(poster) = self.trees_poster() else {
            return Err(KilnError::other("trees poster not wired"));
        };

        let store = &self.store;
        let posted = poster
            .post_if(|task_id| async move {
                let n = store.set_trees_task(sp_id, sector_number, task_id).await?;
                Ok(n == 1)
            })
            .await?;
        if posted.is_none() {
            warn!(sp_id, sector_number, "trees task already posted elsewhere");
        }
        Ok(())
    }
}
