//! Deterministic chain stub: a head that advances one epoch per call and
//! randomness derived by hashing the draw parameters. Good enough for tests
//! and the demo; failure injection via `set_down`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use crate::error::KilnError;
use crate::ports::chain_api::{ChainApi, DomainSeparationTag, TipSet};

pub struct StaticChain {
    height: AtomicI64,
    down: AtomicBool,
}

impl StaticChain {
    pub fn new(start_height: i64) -> Self {
        Self {
            height: AtomicI64::new(start_height),
            down: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable chain node.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Release);
    }

    fn check_up(&self) -> Result<(), KilnError> {
        if self.down.load(Ordering::Acquire) {
            return Err(KilnError::ChainApi("node unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainApi for StaticChain {
    async fn chain_head(&self) -> Result<TipSet, KilnError> {
        self.check_up()?;
        let height = self.height.fetch_add(1, Ordering::AcqRel);
        let key = Sha256::digest(height.to_be_bytes()).to_vec();
        Ok(TipSet { height, key })
    }

    async fn randomness_from_tickets(
        &self,
        tag: DomainSeparationTag,
        epoch: i64,
        entropy: &[u8],
        tipset_key: &[u8],
    ) -> Result<[u8; 32], KilnError> {
        self.check_up()?;
        let mut hasher = Sha256::new();
        hasher.update([tag as u8]);
        hasher.update(epoch.to_be_bytes());
        hasher.update(entropy);
        hasher.update(tipset_key);
        Ok(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn randomness_is_deterministic_per_draw() {
        let chain = StaticChain::new(5000);
        let a = chain
            .randomness_from_tickets(DomainSeparationTag::SealRandomness, 100, b"e", b"k")
            .await
            .unwrap();
        let b = chain
            .randomness_from_tickets(DomainSeparationTag::SealRandomness, 100, b"e", b"k")
            .await
            .unwrap();
        let c = chain
            .randomness_from_tickets(DomainSeparationTag::SealRandomness, 101, b"e", b"k")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn downed_node_errors() {
        let chain = StaticChain::new(5000);
        chain.set_down(true);
        assert!(chain.chain_head().await.is_err());
    }
}
