//! Sealer port: the opaque proof-computation collaborator.
//!
//! The engine never looks inside these operations; it only dispatches them
//! as task bodies and reacts to success or failure.

use async_trait::async_trait;

use crate::error::KilnError;
use crate::pipeline::zerocomm::Commitment;
use crate::pipeline::{RegisteredSealProof, SectorRef};
use crate::reservation::Reservation;

#[async_trait]
pub trait SealerApi: Send + Sync {
    /// Run SDR layer generation for `sector` into the reserved scratch
    /// space.
    async fn generate_sdr(
        &self,
        sector: &SectorRef,
        reservation: &Reservation,
        ticket: &[u8; 32],
        unsealed_cid: &Commitment,
    ) -> Result<(), KilnError>;

    /// Build the commitment trees over the generated layers and return the
    /// sealed commitment.
    async fn build_trees(&self, sector: &SectorRef) -> Result<Commitment, KilnError>;

    /// Expected on-disk footprint of SDR scratch data for a proof type.
    fn sdr_scratch_bytes(&self, proof: RegisteredSealProof) -> u64;
}
