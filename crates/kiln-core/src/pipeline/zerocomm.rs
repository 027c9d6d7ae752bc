//! Commitment values over sector data.
//!
//! The zero-commitment is the binary-merkle commitment of an all-zeros
//! padded piece: a 32-byte zero leaf, parents are SHA-256(left || right)
//! truncated to 254 bits, one level per doubling up to the padded size.
//! Because every node at a level is identical, the whole tree collapses to
//! one hash chain, so the value is cheap to compute for any size.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use super::RegisteredSealProof;
use crate::pipeline::store::PieceRow;

pub const NODE_SIZE: u64 = 32;

/// A 32-byte commitment (unsealed or sealed CID payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Field elements are 254 bits; the top two bits of the last byte are
/// cleared after every hash.
fn trunc254(node: &mut [u8; 32]) {
    node[31] &= 0b0011_1111;
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: [u8; 32] = hasher.finalize().into();
    trunc254(&mut out);
    out
}

/// Canonical zero-commitment for a padded piece of `padded_size` bytes.
/// `padded_size` must be a power of two >= 32.
pub fn zero_commitment(padded_size: u64) -> Commitment {
    debug_assert!(padded_size.is_power_of_two() && padded_size >= NODE_SIZE);

    let mut node = [0u8; 32];
    let mut size = NODE_SIZE;
    while size < padded_size {
        node = hash_pair(&node, &node);
        size *= 2;
    }
    Commitment(node)
}

/// Unsealed commitment derived from an ordered, non-empty piece list:
/// fold the pieces into the zero-commitment baseline in index order. The
/// value depends on every piece's CID, size, and position.
pub fn unsealed_commitment(proof: RegisteredSealProof, pieces: &[PieceRow]) -> Commitment {
    let mut node = zero_commitment(proof.sector_size()).0;
    for piece in pieces {
        let mut hasher = Sha256::new();
        hasher.update(node);
        hasher.update(piece.piece_index.to_be_bytes());
        hasher.update((piece.piece_size as u64).to_be_bytes());
        hasher.update(piece.piece_cid.as_bytes());
        node = hasher.finalize().into();
        trunc254(&mut node);
    }
    Commitment(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn smallest_piece_is_the_zero_leaf() {
        assert_eq!(zero_commitment(32), Commitment([0u8; 32]));
    }

    #[rstest]
    #[case(2048)]
    #[case(512 << 20)]
    #[case(32 << 30)]
    fn zero_commitment_is_deterministic(#[case] size: u64) {
        assert_eq!(zero_commitment(size), zero_commitment(size));
    }

    #[test]
    fn doubling_the_size_adds_one_hash_level() {
        let small = zero_commitment(1024).0;
        let big = zero_commitment(2048);
        assert_eq!(big.0, hash_pair(&small, &small));
    }

    #[test]
    fn commitments_are_254_bit() {
        let c = zero_commitment(2048);
        assert_eq!(c.0[31] & 0b1100_0000, 0);
    }

    #[test]
    fn piece_order_changes_the_commitment() {
        let a = PieceRow {
            piece_index: 0,
            piece_cid: "baga-a".into(),
            piece_size: 1024,
        };
        let b = PieceRow {
            piece_index: 1,
            piece_cid: "baga-b".into(),
            piece_size: 1024,
        };
        let proof = RegisteredSealProof::StackedDrg2KiBV1;

        let forward = unsealed_commitment(proof, &[a.clone(), b.clone()]);
        let reversed = unsealed_commitment(proof, &[b, a]);
        assert_ne!(forward, reversed);
    }
}
