//! Demo sealer: stands in for the proof stack. Persists deterministic
//! pseudo-layers into a blob store so the pipeline produces observable
//! output, and derives the sealed commitment by hashing them back.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use crate::error::KilnError;
use crate::pipeline::zerocomm::Commitment;
use crate::pipeline::{RegisteredSealProof, SectorRef};
use crate::ports::blob_store::{BlobStore, IterOptions};
use crate::ports::sealer::SealerApi;
use crate::reservation::Reservation;

const SDR_LAYERS: u64 = 11;

pub struct DemoSealer {
    blobs: Arc<dyn BlobStore>,
}

impl DemoSealer {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn layer_prefix(sector: &SectorRef) -> Vec<u8> {
        format!("layers/{}/{}/", sector.sp_id, sector.sector_number).into_bytes()
    }
}

#[async_trait]
impl SealerApi for DemoSealer {
    async fn generate_sdr(
        &self,
        sector: &SectorRef,
        _reservation: &Reservation,
        ticket: &[u8; 32],
        unsealed_cid: &Commitment,
    ) -> Result<(), KilnError> {
        let prefix = Self::layer_prefix(sector);
        let mut batch = self.blobs.write_batch();

        let mut node: [u8; 32] = {
            let mut hasher = Sha256::new();
            hasher.update(ticket);
            hasher.update(unsealed_cid.0);
            hasher.finalize().into()
        };

        for layer in 0..SDR_LAYERS {
            let mut key = prefix.clone();
            key.extend_from_slice(format!("{layer:02}").as_bytes());
            batch.set(&key, &node)?;
            node = Sha256::digest(node).into();
        }

        batch.flush()
    }

    async fn build_trees(&self, sector: &SectorRef) -> Result<Commitment, KilnError> {
        let layers = self
            .blobs
            .iter(IterOptions::with_prefix(Self::layer_prefix(sector)))
            .await?;
        if layers.len() != SDR_LAYERS as usize {
            return Err(KilnError::Sealer(format!(
                "expected {SDR_LAYERS} layers for {}/{}, found {}",
                sector.sp_id,
                sector.sector_number,
                layers.len()
            )));
        }

        let mut hasher = Sha256::new();
        for (_, value) in layers {
            hasher.update(value);
        }
        let mut out: [u8; 32] = hasher.finalize().into();
        out[31] &= 0b0011_1111;
        Ok(Commitment(out))
    }

    fn sdr_scratch_bytes(&self, proof: RegisteredSealProof) -> u64 {
        // Eleven layers plus one cache-sized allowance.
        proof.sector_size() * (SDR_LAYERS + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBlobStore;
    use crate::reservation::{ReservationManager, StorageBackend};

    fn sector() -> SectorRef {
        SectorRef {
            sp_id: 1000,
            sector_number: 1,
            proof: RegisteredSealProof::StackedDrg2KiBV1,
        }
    }

    #[tokio::test]
    async fn trees_require_generated_layers() {
        let sealer = DemoSealer::new(Arc::new(InMemoryBlobStore::new()));
        assert!(sealer.build_trees(&sector()).await.is_err());
    }

    async fn seal_once(mgr: &ReservationManager, blobs: Arc<dyn BlobStore>) -> Commitment {
        let sealer = DemoSealer::new(blobs);
        let res = mgr
            .reserve(sealer.sdr_scratch_bytes(sector().proof))
            .unwrap();
        sealer
            .generate_sdr(&sector(), &res, &[7u8; 32], &Commitment([1u8; 32]))
            .await
            .unwrap();
        res.commit();
        sealer.build_trees(&sector()).await.unwrap()
    }

    #[tokio::test]
    async fn sdr_then_trees_is_deterministic() {
        let mgr = ReservationManager::new([StorageBackend {
            id: "b0".into(),
            capacity: 1 << 30,
        }]);

        let a = seal_once(&mgr, Arc::new(InMemoryBlobStore::new())).await;
        let b = seal_once(&mgr, Arc::new(InMemoryBlobStore::new())).await;
        assert_eq!(a, b);
    }
}
