//! Chain API port: the external randomness source for sealing tickets.
//!
//! Failures here are ordinary retryable errors; task bodies propagate them
//! and rely on the engine's generic retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KilnError;

/// Epochs to look back from the chain head when drawing seal randomness, so
/// the ticket stays stable across small reorgs.
pub const SEAL_RANDOMNESS_LOOKBACK: i64 = 900;

/// Minimal view of a chain tipset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipSet {
    pub height: i64,
    /// Opaque key identifying the tipset, passed back when drawing
    /// randomness.
    pub key: Vec<u8>,
}

/// Domain separation for randomness draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainSeparationTag {
    SealRandomness,
    InteractiveSealChallengeSeed,
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn chain_head(&self) -> Result<TipSet, KilnError>;

    async fn randomness_from_tickets(
        &self,
        tag: DomainSeparationTag,
        epoch: i64,
        entropy: &[u8],
        tipset_key: &[u8],
    ) -> Result<[u8; 32], KilnError>;
}
