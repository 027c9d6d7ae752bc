//! Demo worker: wires the in-memory stores, a deterministic chain stub, and
//! the demo sealer into one engine, seals two 2 KiB sectors end to end, and
//! prints the resulting pipeline state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use kiln_core::config::EngineConfig;
use kiln_core::domain::MachineResources;
use kiln_core::engine::{RetryPolicy, TaskEngine, TaskInterface};
use kiln_core::error::KilnError;
use kiln_core::impls::{
    DemoSealer, InMemoryBlobStore, InMemoryPipelineStore, InMemoryTaskStore, StaticChain,
};
use kiln_core::pipeline::store::{PieceRow, PipelineStore, SectorParams};
use kiln_core::pipeline::{RegisteredSealProof, SdrTask, SealPoller, TreesTask};
use kiln_core::ports::TaskStore;
use kiln_core::ports::blob_store::BlobStore;
use kiln_core::ports::chain_api::ChainApi;
use kiln_core::ports::sealer::SealerApi;
use kiln_core::reservation::{ReservationManager, StorageBackend};

const SP_ID: i64 = 1000;

#[tokio::main]
async fn main() -> Result<(), KilnError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The demo seals 2 KiB sectors; always run with devnet costs so the
    // stages fit on a developer machine.
    let config = EngineConfig {
        devnet: true,
        ..EngineConfig::from_env()
    };

    let tasks = Arc::new(InMemoryTaskStore::new());
    let pipe: Arc<dyn PipelineStore> = Arc::new(InMemoryPipelineStore::new());
    let poller = SealPoller::new(pipe);
    let chain: Arc<dyn ChainApi> = Arc::new(StaticChain::new(10_000));
    let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let sealer: Arc<dyn SealerApi> = Arc::new(DemoSealer::new(Arc::clone(&blobs)));
    let storage = Arc::new(ReservationManager::new([StorageBackend {
        id: "scratch".into(),
        capacity: 4 << 30,
    }]));

    let sdr = SdrTask::new(
        chain,
        Arc::clone(&poller),
        Arc::clone(&sealer),
        Arc::clone(&storage),
        2,
        config.devnet,
    );
    let trees = TreesTask::new(Arc::clone(&poller), Arc::clone(&sealer), 2, config.devnet);

    // Seed: one sector with a piece, one pieceless (zero-commitment path).
    // The SDR boredom hook picks both up and posts the task rows.
    let proof = RegisteredSealProof::StackedDrg2KiBV1;
    poller
        .store()
        .create_sector(
            SectorParams {
                sp_id: SP_ID,
                sector_number: 1,
                reg_seal_proof: proof,
            },
            vec![PieceRow {
                piece_index: 0,
                piece_cid: "baga-demo-piece".into(),
                piece_size: 2048,
            }],
        )
        .await?;
    poller
        .store()
        .create_sector(
            SectorParams {
                sp_id: SP_ID,
                sector_number: 2,
                reg_seal_proof: proof,
            },
            vec![],
        )
        .await?;

    let handle = TaskEngine::spawn(
        vec![
            Arc::new(sdr) as Arc<dyn TaskInterface>,
            Arc::new(trees) as Arc<dyn TaskInterface>,
        ],
        Arc::clone(&tasks) as Arc<dyn TaskStore>,
        MachineResources::detect(0.0),
        config.clone(),
        RetryPolicy::default(),
    )?;
    info!(worker = %handle.worker(), "engine started");

    // Wait for both sectors to clear the Trees stage.
    loop {
        let mut sealed = 0;
        for n in [1, 2] {
            if let Some(row) = poller.store().sector_row(SP_ID, n).await? {
                if row.after_trees {
                    sealed += 1;
                }
            }
        }
        if sealed == 2 {
            break;
        }

        let counts = tasks.counts_by_state().await?;
        if counts.failed > 0 {
            return Err(KilnError::other("a pipeline task failed permanently"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for n in [1, 2] {
        if let Some(row) = poller.store().sector_row(SP_ID, n).await? {
            if let (Some(epoch), Some(cid)) = (row.ticket_epoch, row.tree_r_cid) {
                info!(sector = n, ticket_epoch = epoch, sealed_cid = %cid, "sector sealed");
            }
        }
    }

    let counts = tasks.counts_by_state().await?;
    info!(
        pending = counts.pending,
        owned = counts.owned,
        done = counts.done,
        failed = counts.failed,
        "task rows"
    );
    info!(
        used = storage.used_bytes(),
        free = storage.free_bytes(),
        "scratch storage"
    );

    blobs.flatten(config.compaction_workers).await?;
    info!(bytes = blobs.size().await?, "blob store compacted");

    handle.shutdown_and_join().await;
    Ok(())
}
